/// A unique identifier for one submission of a [Job](super::traits::Job).
///
/// A fresh id is assigned by the queue each time a job is submitted, so a
/// job that is re-submitted (eg a multi-step continuation) gets a new id per
/// pass through the queue.  Ids appear in log output only; the queue never
/// uses them for lookup or dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobId([u8; 12]);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl JobId {
    /// generates a random JobId
    pub(crate) fn random() -> Self {
        Self(rand::random())
    }
}
