use std::sync::Mutex;

/// error reported by a job whose execution failed.
///
/// The consumer loop is the error boundary of the scheduler: a `JobError`
/// returned from [Job::run](crate::traits::Job::run) or
/// [Job::run_async](crate::traits::Job::run_async) is caught and logged there,
/// and the job is treated as completed.  Nothing propagates to the submitter,
/// and there is no automatic retry.  A producer that wants a retry submits a
/// fresh job.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    message: String,

    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl JobError {
    /// instantiate from a bare message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// instantiate from a message plus the underlying error
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// the failure message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Holds panic information from a job that panicked during processing.
//
// 1. The Box holds panic info as returned from tokio JoinError::into_panic()
//    or from catch_unwind().
// 2. The Mutex makes the panic info `Sync`.  It is only ever locked briefly
//    in panic_message(), never held across an await.
//
// std::sync::Exclusive would be a better fit than Mutex but is not yet in
// stable rust.
pub struct PanicInfo(Mutex<Box<dyn std::any::Any + Send + 'static>>);

impl std::fmt::Debug for PanicInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PanicInfo")
            .field(&self.panic_message())
            .finish()
    }
}

impl From<Box<dyn std::any::Any + Send + 'static>> for PanicInfo {
    fn from(panic_info: Box<dyn std::any::Any + Send + 'static>) -> Self {
        Self(Mutex::new(panic_info))
    }
}

impl PanicInfo {
    /// returns the panic message, if the panic payload has a string
    /// representation
    pub fn panic_message(&self) -> Option<String> {
        let guard = self.0.lock().ok()?;
        if let Some(s) = guard.downcast_ref::<&'static str>() {
            Some((*s).to_string())
        } else {
            guard.downcast_ref::<String>().cloned()
        }
    }

    /// consumes self, returning the object with which the job panicked
    pub fn into_panic(self) -> Box<dyn std::any::Any + Send + 'static> {
        match self.0.into_inner() {
            Ok(boxed) => boxed,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panic_message_from_join_error() {
        let join_err = tokio::spawn(async { panic!("boom") }).await.unwrap_err();
        let info: PanicInfo = join_err.into_panic().into();
        assert_eq!(Some("boom"), info.panic_message().as_deref());
    }

    #[tokio::test]
    async fn into_panic_returns_payload() {
        let join_err = tokio::spawn(async { panic!("boom") }).await.unwrap_err();
        let info: PanicInfo = join_err.into_panic().into();
        let payload = info.into_panic();
        assert_eq!(Some(&"boom"), payload.downcast_ref::<&'static str>());
    }

    #[test]
    fn job_error_display_and_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = JobError::with_source("folder sync failed", io);
        assert_eq!("folder sync failed", err.to_string());
        assert!(std::error::Error::source(&err).is_some());

        let bare = JobError::new("nothing to do");
        assert!(std::error::Error::source(&bare).is_none());
    }
}
