//! Sample queue shared between the capture thread and the orchestrator.
//!
//! Samples are stored newest-first. Every access goes through one mutex and
//! the lock is held only for the push or the drain itself, never while
//! analysing.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::error::CaptureError;

#[derive(Debug, Default)]
pub struct SampleQueue {
    samples: Mutex<VecDeque<f32>>,
}

impl SampleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<f32>>, CaptureError> {
        self.samples.lock().map_err(|_| CaptureError::LockPoisoned {
            component: "sample_queue".to_string(),
        })
    }

    /// Push a packet given in capture order; its last sample ends up at the front.
    pub fn push_packet(&self, packet: &[f32]) -> Result<(), CaptureError> {
        let mut samples = self.lock()?;
        samples.reserve(packet.len());
        for &sample in packet {
            samples.push_front(sample);
        }
        Ok(())
    }

    /// Take every queued sample at once (newest-first). Never blocks on data.
    pub fn drain(&self) -> VecDeque<f32> {
        match self.lock() {
            Ok(mut samples) => std::mem::take(&mut *samples),
            Err(_) => VecDeque::new(),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut samples) = self.lock() {
            samples.clear();
        }
    }

    /// Backlog size in samples.
    pub fn len(&self) -> usize {
        self.lock().map(|samples| samples.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packets_are_stored_newest_first() {
        let queue = SampleQueue::new();
        queue.push_packet(&[0.1, 0.2]).unwrap();
        queue.push_packet(&[0.3]).unwrap();
        assert_eq!(queue.len(), 3);

        let drained = queue.drain();
        assert_eq!(drained, VecDeque::from(vec![0.3, 0.2, 0.1]));
        assert!(queue.is_empty(), "drain must leave the queue empty");
    }

    #[test]
    fn test_drain_on_empty_queue_is_empty() {
        let queue = SampleQueue::new();
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_concurrent_pushes_are_not_lost() {
        use std::sync::Arc;

        let queue = Arc::new(SampleQueue::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        queue.push_packet(&[0.5; 16]).unwrap();
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(queue.drain().len(), 4 * 100 * 16);
    }
}
