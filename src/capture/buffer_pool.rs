// BufferPool - recycled packet buffers between an audio callback and the capture loop
//
// Two lock-free SPSC ring buffers move pre-allocated packets around so the
// driver callback never allocates:
// - data queue: callback pushes filled packets, capture loop pops them
// - pool queue: capture loop returns drained packets, callback reuses them
//
// When the pool runs dry the callback drops the packet; the loss is counted
// by the caller.

use rtrb::{Consumer, Producer};

pub const DEFAULT_BUFFER_COUNT: usize = 16;
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Packet of mono f32 samples
pub type PacketBuffer = Vec<f32>;

/// Ends owned by the driver callback thread
pub struct CallbackChannels {
    pub pool_consumer: Consumer<PacketBuffer>,
    pub data_producer: Producer<PacketBuffer>,
}

impl CallbackChannels {
    /// Copy one packet into a recycled buffer and queue it.
    ///
    /// `map` is applied to every input sample. Returns false when no buffer
    /// was free or the data queue was full.
    pub fn push_packet<T: Copy>(&mut self, samples: &[T], stride: usize, map: impl Fn(T) -> f32) -> bool {
        let Ok(mut buffer) = self.pool_consumer.pop() else {
            return false;
        };
        buffer.clear();
        buffer.extend(samples.iter().step_by(stride.max(1)).map(|&s| map(s)));
        self.data_producer.push(buffer).is_ok()
    }
}

/// Ends owned by the capture loop
pub struct LoopChannels {
    pub data_consumer: Consumer<PacketBuffer>,
    pub pool_producer: Producer<PacketBuffer>,
}

impl LoopChannels {
    /// Pop a filled packet, hand it to `f`, then recycle it.
    pub fn with_next_packet<R>(&mut self, f: impl FnOnce(&[f32]) -> R) -> Option<R> {
        let buffer = self.data_consumer.pop().ok()?;
        let result = f(&buffer);
        let _ = self.pool_producer.push(buffer);
        Some(result)
    }
}

pub struct BufferPool;

impl BufferPool {
    /// Allocate `buffer_count` buffers of `buffer_size` capacity and split
    /// the queues into callback and loop ends.
    ///
    /// Zero sizes are raised to one.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(buffer_count: usize, buffer_size: usize) -> (CallbackChannels, LoopChannels) {
        let buffer_count = buffer_count.max(1);
        let buffer_size = buffer_size.max(1);

        let (mut pool_producer, pool_consumer) = rtrb::RingBuffer::new(buffer_count);
        let (data_producer, data_consumer) = rtrb::RingBuffer::new(buffer_count);

        for _ in 0..buffer_count {
            if pool_producer
                .push(Vec::with_capacity(buffer_size))
                .is_err()
            {
                break;
            }
        }

        (
            CallbackChannels {
                pool_consumer,
                data_producer,
            },
            LoopChannels {
                data_consumer,
                pool_producer,
            },
        )
    }
}
