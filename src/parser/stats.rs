//! Run statistics tracking.

/// Counters for one parsed mbox.
///
/// `read` always equals valid plus invalid messages; deletion, duplication
/// and date exclusion are facets of valid messages.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Envelope lines found.
    pub read: usize,
    /// Messages that passed classification and reached the sinks.
    pub accepted: usize,
    /// Messages missing `From:`/`Date:` or an unresolvable date.
    pub invalid: usize,
    /// Messages carrying Mozilla deletion bits.
    pub deleted: usize,
    /// Messages whose naming key was already emitted this run.
    pub duplicated: usize,
    /// Valid messages rejected by the date window.
    pub excluded: usize,
    /// New eml files written.
    pub extracted: usize,
    /// Messages appended to the compact mbox.
    pub compact: usize,
    /// Messages appended to split parts.
    pub split: usize,
    /// Split part files created.
    pub split_files: usize,
    /// Files removed from the destination during synchronisation.
    pub removed: usize,
}

impl RunStats {
    /// Number of valid messages.
    pub fn valid(&self) -> usize {
        self.read - self.invalid
    }

    /// Sum another run's counters into this one. Used for the batch total.
    pub fn merge(&mut self, other: &RunStats) {
        self.read += other.read;
        self.accepted += other.accepted;
        self.invalid += other.invalid;
        self.deleted += other.deleted;
        self.duplicated += other.duplicated;
        self.excluded += other.excluded;
        self.extracted += other.extracted;
        self.compact += other.compact;
        self.split += other.split;
        self.split_files += other.split_files;
        self.removed += other.removed;
    }
}
