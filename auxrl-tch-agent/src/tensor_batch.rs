//! Replay buffer storage backed by a [`Tensor`].
use auxrl_core::replay_buffer::BatchBase;
use tch::Tensor;

/// A buffer consisting of a [`Tensor`](tch::Tensor).
///
/// The internal buffer of this struct has the shape of `[capacity, shape[1..]]`,
/// where `shape` is obtained from the data pushed at the first time via
/// [`TensorBatch::push`] method. `[1..]` means that the first axis of the
/// given data is ignored as it might be batch size.
pub struct TensorBatch {
    buf: Option<Tensor>,
    capacity: i64,
}

impl Clone for TensorBatch {
    fn clone(&self) -> Self {
        let buf = self.buf.as_ref().map(|t| t.copy());

        Self {
            buf,
            capacity: self.capacity,
        }
    }
}

impl TensorBatch {
    /// Creates a buffer from a tensor, whose first axis is taken as the capacity.
    pub fn from_tensor(t: Tensor) -> Self {
        let capacity = t.size()[0] as _;
        Self {
            buf: Some(t),
            capacity,
        }
    }

    /// Returns a shallow clone of the internal buffer, if initialized.
    pub fn tensor(&self) -> Option<Tensor> {
        self.buf.as_ref().map(|t| t.shallow_clone())
    }
}

impl BatchBase for TensorBatch {
    fn new(capacity: usize) -> Self {
        Self {
            buf: None,
            capacity: capacity as _,
        }
    }

    /// Pushes given data.
    ///
    /// If the internal buffer is empty, it will be initialized with the shape
    /// `[capacity, data.buf.size()[1..]]`.
    fn push(&mut self, index: usize, data: Self) {
        if data.buf.is_none() {
            return;
        }

        let batch_size = data.buf.as_ref().unwrap().size()[0];
        if batch_size == 0 {
            return;
        }

        if self.buf.is_none() {
            let mut shape = data.buf.as_ref().unwrap().size();
            shape[0] = self.capacity;
            let kind = data.buf.as_ref().unwrap().kind();
            let device = tch::Device::Cpu;
            self.buf = Some(Tensor::zeros(shape.as_slice(), (kind, device)));
        }

        let index = index as i64;
        let val: Tensor = data.buf.as_ref().unwrap().copy();

        for i_ in 0..batch_size {
            let i = (i_ + index) % self.capacity;
            self.buf.as_ref().unwrap().get(i).copy_(&val.get(i_));
        }
    }

    fn sample(&self, ixs: &[usize]) -> Self {
        let ixs = ixs.iter().map(|&ix| ix as i64).collect::<Vec<_>>();
        let batch_indexes = Tensor::from_slice(&ixs);
        let buf = Some(self.buf.as_ref().unwrap().index_select(0, &batch_indexes));
        Self {
            buf,
            capacity: ixs.len() as i64,
        }
    }
}

impl From<TensorBatch> for Tensor {
    fn from(b: TensorBatch) -> Self {
        b.buf.unwrap()
    }
}
