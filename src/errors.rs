use thiserror::Error;

/// Rejections returned by [`Pool::schedule`](crate::pool::Pool::schedule).
#[derive(Debug, PartialEq, Eq, Clone, Copy, Error)]
pub enum ScheduleError {
    /// Every worker is busy and the pool was configured not to block.
    #[error("no idle worker in pool")]
    NoIdleWorker,
    /// The pool has been freed and accepts no further tasks.
    #[error("worker pool freed")]
    PoolFreed,
}

/// Wire-level violations raised by the frame and packet codecs.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Declared frame length is shorter than a header or above the cap.
    #[error("frame length {0} out of range")]
    BadFrameLength(usize),
    /// Packet body ended before its fixed fields.
    #[error("packet truncated")]
    Truncated,
    /// First byte of the packet is not a known command.
    #[error("unknown command 0x{0:02x}")]
    UnknownCommand(u8),
    /// Request IDs are fixed-width ASCII; anything else is rejected.
    #[error("malformed request id")]
    BadRequestId,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
