use crate::{
    all_reduce::ReduceKind, invalid_argument, transport::Solo, Buffer, CollectiveExecutor,
    CollectiveTransport, CommConfig, CommError, Device, ReplicaGroups, Streams, SyncToken,
};
use std::{borrow::BorrowMut, sync::Arc};

/// Everything a replica needs to take part in collectives.
pub struct DistContext {
    executor: CollectiveExecutor,
    streams: Streams,
    config: CommConfig,
}

impl DistContext {
    pub fn new(transport: Arc<dyn CollectiveTransport>, config: CommConfig) -> Self {
        Self {
            executor: CollectiveExecutor::new(transport),
            streams: Streams::default(),
            config,
        }
    }

    /// `n` connected replicas living in this process, one context each.
    #[cfg(any(feature = "inproc", test))]
    pub fn inproc(n: usize, config: CommConfig) -> Vec<Self> {
        crate::InprocNode::with_timeout(n, config.timeout)
            .into_iter()
            .map(|node| Self::new(Arc::new(node), config.clone()))
            .collect()
    }

    #[inline]
    pub fn solo() -> Self {
        Self::new(Arc::new(Solo), CommConfig::default())
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.executor.transport().rank()
    }

    #[inline]
    pub fn world_size(&self) -> usize {
        self.executor.transport().world_size()
    }

    #[inline]
    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    #[inline]
    pub fn executor(&self) -> &CollectiveExecutor {
        &self.executor
    }

    #[inline]
    pub fn create_token(&self, device: &Device) -> SyncToken {
        SyncToken::create(&self.streams, device)
    }

    pub fn resolve_groups(
        &self,
        requested: Option<&[Vec<usize>]>,
    ) -> Result<ReplicaGroups, CommError> {
        ReplicaGroups::resolve(
            requested,
            self.world_size(),
            self.executor.transport().group_support(),
        )
    }

    /// Returns a new buffer holding `input` reduced across replicas, times `scale`.
    pub fn all_reduce(
        &self,
        kind: ReduceKind,
        input: &Buffer,
        scale: f64,
        groups: Option<&[Vec<usize>]>,
    ) -> Result<Buffer, CommError> {
        let groups = self.resolve_groups(groups)?;
        let token = self.create_token(input.device());
        self.executor
            .reduce_value(kind, input, token, scale, &groups)
    }

    pub fn all_reduce_inplace<'a, B: BorrowMut<Buffer>>(
        &self,
        kind: ReduceKind,
        inputs: &'a mut [B],
        scale: f64,
        groups: Option<&[Vec<usize>]>,
    ) -> Result<&'a mut [B], CommError> {
        let groups = self.resolve_groups(groups)?;
        let Some(first) = inputs.first() else {
            return Err(invalid_argument("no buffer to reduce"));
        };
        let token = self.create_token(first.borrow().device());
        self.executor.reduce(kind, inputs, token, scale, &groups)
    }

    /// Concatenates `value` of every replica along `dim` in rank order.
    /// A negative `dim` counts from the last axis.
    pub fn all_gather(
        &self,
        value: &Buffer,
        dim: isize,
        groups: Option<&[Vec<usize>]>,
    ) -> Result<Buffer, CommError> {
        let groups = self.resolve_groups(groups)?;
        let token = self.create_token(value.device());
        self.executor.gather(value, dim, &groups, token)
    }

    pub fn all_gather_into<'a>(
        &self,
        value: &Buffer,
        dim: isize,
        groups: Option<&[Vec<usize>]>,
        output: &'a mut Buffer,
    ) -> Result<&'a mut Buffer, CommError> {
        let groups = self.resolve_groups(groups)?;
        let token = self.create_token(value.device());
        self.executor.gather_into(value, dim, &groups, token, output)
    }
}

#[cfg(test)]
mod test {
    use super::DistContext;
    use crate::{all_reduce::ReduceKind::*, Buffer, CommConfig, CommErrorKind, Device};
    use std::thread;

    fn spawn<T: Send + 'static>(
        n: usize,
        f: impl Fn(DistContext) -> T + Send + Sync + Clone + 'static,
    ) -> Vec<T> {
        DistContext::inproc(n, CommConfig::default())
            .into_iter()
            .map(|ctx| {
                let f = f.clone();
                thread::spawn(move || f(ctx))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect()
    }

    #[test]
    fn test_solo_scale() {
        let ctx = DistContext::solo();
        assert_eq!(ctx.rank(), 0);
        assert_eq!(ctx.world_size(), 1);

        let value = Buffer::from_slice(&[1.5f32, -2., 4.], &[3], Device::cpu()).unwrap();
        let ans = ctx.all_reduce(Sum, &value, 2., None).unwrap();
        assert_eq!(ans.to_vec::<f32>().unwrap(), [3., -4., 8.]);
        assert_eq!(value.to_vec::<f32>().unwrap(), [1.5, -2., 4.]);

        let mut buffers = [value.clone(), value];
        let ans = ctx.all_reduce_inplace(Sum, &mut buffers, 0.5, None).unwrap();
        for b in ans.iter() {
            assert_eq!(b.to_vec::<f32>().unwrap(), [0.75, -1., 2.]);
        }
    }

    #[test]
    fn test_solo_gather() {
        let ctx = DistContext::solo();
        let value = Buffer::from_slice(&[1u32, 2, 3, 4], &[2, 2], Device::cpu()).unwrap();
        let ans = ctx.all_gather(&value, -1, None).unwrap();
        assert_eq!(ans.shape(), [2, 2]);
        assert_eq!(ans.to_vec::<u32>().unwrap(), [1, 2, 3, 4]);

        let e = ctx.all_gather(&value, 2, None).unwrap_err();
        assert_eq!(e.kind(), CommErrorKind::InvalidArgument);
    }

    #[test]
    fn test_gather() {
        let results = spawn(2, |ctx| {
            let r = ctx.rank() as u32;
            let value = Buffer::from_slice(&[2 * r + 1, 2 * r + 2], &[2], Device::cpu()).unwrap();
            let flat = ctx.all_gather(&value, 0, None).unwrap();

            let value =
                Buffer::from_slice(&[2 * r + 1, 2 * r + 2], &[2, 1], Device::cpu()).unwrap();
            let mut output = Buffer::zeros(value.dt(), &[2, 2], Device::cpu());
            ctx.all_gather_into(&value, -1, None, &mut output).unwrap();
            (flat, output)
        });
        for (flat, output) in results {
            assert_eq!(flat.shape(), [4]);
            assert_eq!(flat.to_vec::<u32>().unwrap(), [1, 2, 3, 4]);
            assert_eq!(output.to_vec::<u32>().unwrap(), [1, 3, 2, 4]);
        }
    }

    #[test]
    fn test_idempotent() {
        let results = spawn(3, |ctx| {
            let value = Buffer::from_slice(&[7i32, -3], &[2], Device::cpu()).unwrap();
            let min = ctx.all_reduce(Min, &value, 1., None).unwrap();
            let max = ctx.all_reduce(Max, &value, 1., None).unwrap();
            let value = Buffer::from_slice(&[1.5f64], &[1], Device::cpu()).unwrap();
            let mean = ctx.all_reduce(Sum, &value, 1. / 3., None).unwrap();
            (
                min.to_vec::<i32>().unwrap(),
                max.to_vec::<i32>().unwrap(),
                mean.to_vec::<f64>().unwrap(),
            )
        });
        for (min, max, mean) in results {
            assert_eq!(min, [7, -3]);
            assert_eq!(max, [7, -3]);
            assert!((mean[0] - 1.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_rejected_untouched() {
        let ctx = DistContext::solo();
        let a = Buffer::from_slice(&[1f32, 2.], &[2], Device::cpu()).unwrap();
        let b = Buffer::from_slice(&[1f32, 2., 3.], &[3], Device::cpu()).unwrap();
        let c = Buffer::from_slice(&[5f32, 6.], &[2], Device::accelerator(0)).unwrap();

        let mut buffers = [a.clone(), b];
        let e = ctx
            .all_reduce_inplace(Sum, &mut buffers, 2., None)
            .unwrap_err();
        assert_eq!(e.kind(), CommErrorKind::ShapeMismatch);
        assert_eq!(buffers[0].to_vec::<f32>().unwrap(), [1., 2.]);

        let mut buffers = [a, c];
        let e = ctx
            .all_reduce_inplace(Sum, &mut buffers, 2., None)
            .unwrap_err();
        assert_eq!(e.kind(), CommErrorKind::DeviceMismatch);
        assert_eq!(buffers[0].to_vec::<f32>().unwrap(), [1., 2.]);
        assert_eq!(buffers[1].to_vec::<f32>().unwrap(), [5., 6.]);

        let mut empty: [Buffer; 0] = [];
        let e = ctx
            .all_reduce_inplace(Sum, &mut empty, 1., None)
            .unwrap_err();
        assert_eq!(e.kind(), CommErrorKind::InvalidArgument);

        let ints = Buffer::from_slice(&[1u8], &[1], Device::cpu()).unwrap();
        let e = ctx.all_reduce(Sum, &ints, 0.5, None).unwrap_err();
        assert_eq!(e.kind(), CommErrorKind::TypeNotSupport);
    }

    #[test]
    fn test_timeout() {
        let config = CommConfig {
            timeout: Some(std::time::Duration::from_millis(50)),
            ..Default::default()
        };
        let mut contexts = DistContext::inproc(2, config);
        let _idle = contexts.pop();
        let ctx = contexts.pop().unwrap();
        let value = Buffer::from_slice(&[1f32], &[1], Device::cpu()).unwrap();
        let e = ctx.all_reduce(Sum, &value, 1., None).unwrap_err();
        assert_eq!(e.kind(), CommErrorKind::Timeout);
        let e = ctx.all_reduce(Sum, &value, 1., None).unwrap_err();
        assert_eq!(e.kind(), CommErrorKind::ProtocolViolation);
    }

    #[test]
    fn test_gather_rejected() {
        let ctx = DistContext::solo();
        let value = Buffer::from_slice(&[1u32, 2, 3, 4], &[2, 2], Device::cpu()).unwrap();
        let filled = |shape: &[usize], device| {
            let n = shape.iter().product::<usize>();
            Buffer::from_slice(&vec![9u32; n], shape, device).unwrap()
        };

        for (mut output, kind) in [
            (filled(&[3, 2], Device::cpu()), CommErrorKind::OutputSizeMismatch),
            (filled(&[2, 3], Device::cpu()), CommErrorKind::ShapeMismatch),
            (filled(&[4], Device::cpu()), CommErrorKind::ShapeMismatch),
            (
                Buffer::zeros(digit_layout::types::F32, &[2, 2], Device::cpu()),
                CommErrorKind::ShapeMismatch,
            ),
            (filled(&[2, 2], Device::accelerator(0)), CommErrorKind::DeviceMismatch),
        ] {
            let before = output.bytes().to_vec();
            let e = ctx
                .all_gather_into(&value, 0, None, &mut output)
                .unwrap_err();
            assert_eq!(e.kind(), kind, "{:?}", output.shape());
            assert_eq!(output.bytes(), before);
        }

        // operand and token on different devices
        let groups = ctx.resolve_groups(None).unwrap();
        let token = ctx.create_token(&Device::accelerator(0));
        let e = ctx.executor().gather(&value, 0, &groups, token).unwrap_err();
        assert_eq!(e.kind(), CommErrorKind::DeviceMismatch);

        let mut output = filled(&[2, 2], Device::cpu());
        ctx.all_gather_into(&value, 1, None, &mut output).unwrap();
        assert_eq!(output.to_vec::<u32>().unwrap(), [1, 2, 3, 4]);
    }

    #[test]
    fn test_groups() {
        let results = spawn(4, |ctx| {
            let value = Buffer::from_slice(&[1u32], &[1], Device::cpu()).unwrap();
            let flat = vec![vec![3, 1, 0, 2]];
            let sum = ctx.all_reduce(Sum, &value, 1., Some(&flat[..])).unwrap();
            let pairs = vec![vec![0, 1], vec![2, 3]];
            let split = ctx.all_reduce(Sum, &value, 1., Some(&pairs[..])).unwrap_err();
            let broken = vec![vec![0, 1], vec![1, 2, 3]];
            let broken = ctx.all_gather(&value, 0, Some(&broken[..])).unwrap_err();
            (sum.to_vec::<u32>().unwrap(), split.kind(), broken.kind())
        });
        for (sum, split, broken) in results {
            assert_eq!(sum, [4]);
            assert_eq!(split, CommErrorKind::FeatureNotSupported);
            assert_eq!(broken, CommErrorKind::InvalidGroupSpec);
        }
    }
}
