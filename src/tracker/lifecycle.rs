/// Lifecycle of a track inside the ByteTrack tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackLifecycle {
    /// Created from an unmatched detection, no association yet
    #[default]
    New,
    /// Matched in the most recent frame
    Tracked,
    /// Missed recently; kept for re-identification within the track buffer
    Lost,
}
