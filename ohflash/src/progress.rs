//! Progress reporting for file transfers.
//!
//! The transfer session knows how many bytes it has pushed but must not know
//! how the host renders that; callers inject an [`Observer`] and the library
//! ships [`NullObserver`] for callers that do not care. The CLI provides a
//! terminal implementation.

/// Callback set notified about the progress of a file transfer.
///
/// `start` and `finish` are each called exactly once per successful
/// transfer; `progress` is called after every acknowledged data block. All
/// calls happen on the transfer thread and must return promptly.
pub trait Observer {
    /// The transfer of `file_name` is about to move data; `total` is the
    /// file size in bytes.
    fn start(&mut self, file_name: &str, total: u64);

    /// `sent` of `total` bytes have been acknowledged by the receiver.
    fn progress(&mut self, sent: u64, total: u64);

    /// All data blocks have been acknowledged.
    fn finish(&mut self);
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn start(&mut self, _file_name: &str, _total: u64) {}

    fn progress(&mut self, _sent: u64, _total: u64) {}

    fn finish(&mut self) {}
}
