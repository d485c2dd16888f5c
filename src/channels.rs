use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::traits::Job;

// signal from submitters to the consumer task that the buffer has new entries.
// messages are of type "()" so are as small as possible.
pub(crate) type JobAddedSender = mpsc::UnboundedSender<()>;
pub(crate) type JobAddedReceiver = mpsc::UnboundedReceiver<()>;

// one-shot execution gate for completion-service wrappers.  false = closed.
pub(crate) type GateSender = watch::Sender<bool>;
pub(crate) type GateReceiver = watch::Receiver<bool>;

// finished original jobs, in completion order.
pub(crate) type ResultsSender = mpsc::UnboundedSender<Arc<dyn Job>>;
pub(crate) type ResultsReceiver = mpsc::UnboundedReceiver<Arc<dyn Job>>;
