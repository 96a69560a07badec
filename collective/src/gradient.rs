use crate::{
    all_reduce::{self, ReduceKind},
    Buffer, CommError, Device, DistContext,
};
use digit_layout::DigitLayout;
use log::{debug, info};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ParamId(pub usize);

pub struct GradientBinding<'a> {
    pub param: ParamId,
    pub grad: Option<&'a mut Buffer>,
}

/// Every replica must list its parameters in the same order.
pub trait GradientSource {
    fn bindings(&mut self) -> Vec<GradientBinding<'_>>;
}

pub struct Parameter {
    pub name: String,
    pub value: Buffer,
    pub grad: Option<Buffer>,
}

#[derive(Default)]
pub struct ParameterSet(Vec<Parameter>);

impl ParameterSet {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: Buffer) -> ParamId {
        let id = ParamId(self.0.len());
        self.0.push(Parameter {
            name: name.into(),
            value,
            grad: None,
        });
        id
    }

    #[inline]
    pub fn get(&self, id: ParamId) -> Option<&Parameter> {
        self.0.get(id.0)
    }

    #[inline]
    pub fn get_mut(&mut self, id: ParamId) -> Option<&mut Parameter> {
        self.0.get_mut(id.0)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.0.iter()
    }
}

impl GradientSource for ParameterSet {
    fn bindings(&mut self) -> Vec<GradientBinding<'_>> {
        self.0
            .iter_mut()
            .enumerate()
            .map(|(i, p)| GradientBinding {
                param: ParamId(i),
                grad: p.grad.as_mut(),
            })
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct ReduceReport {
    pub reduced: usize,
    pub skipped: usize,
    pub calls: usize,
}

pub struct GradientReducer<'ctx> {
    ctx: &'ctx DistContext,
    bucket_bytes: usize,
}

impl<'ctx> GradientReducer<'ctx> {
    #[inline]
    pub fn new(ctx: &'ctx DistContext) -> Self {
        Self {
            ctx,
            bucket_bytes: ctx.config().bucket_bytes,
        }
    }

    #[inline]
    pub fn with_bucket_bytes(self, bucket_bytes: usize) -> Self {
        Self {
            bucket_bytes,
            ..self
        }
    }

    /// Replaces every present gradient by its mean over the replicas.
    pub fn reduce_gradients<S: GradientSource + ?Sized>(
        &self,
        source: &mut S,
        groups: Option<&[Vec<usize>]>,
    ) -> Result<ReduceReport, CommError> {
        let world_size = self.ctx.world_size();
        if world_size == 1 {
            return Ok(ReduceReport::default());
        }
        let groups = self.ctx.resolve_groups(groups)?;

        let mut report = ReduceReport::default();
        let mut buckets = Vec::<Bucket>::new();
        for binding in source.bindings() {
            let Some(grad) = binding.grad else {
                report.skipped += 1;
                continue;
            };
            report.reduced += 1;
            match buckets.iter_mut().find(|b| b.holds(grad)) {
                Some(bucket) => bucket.grads.push(grad),
                None => buckets.push(Bucket::new(grad)),
            }
        }

        let scale = 1. / world_size as f64;
        // a rejected bucket must not leave earlier ones averaged
        for bucket in &buckets {
            all_reduce::Args {
                kind: ReduceKind::Sum,
                buffers: bucket.grads.as_slice(),
                device: &bucket.device,
                scale,
            }
            .meta()?;
        }
        for mut bucket in buckets {
            let per_call = (self.bucket_bytes / bucket.nbytes.max(1)).max(1);
            for chunk in bucket.grads.chunks_mut(per_call) {
                let token = self.ctx.create_token(&bucket.device);
                self.ctx
                    .executor()
                    .reduce(ReduceKind::Sum, chunk, token, scale, &groups)?;
                report.calls += 1;
            }
            debug!(
                "averaged {} gradients of {:?}{:?} on {}",
                bucket.grads.len(),
                bucket.dt,
                bucket.shape,
                bucket.device,
            );
        }
        info!(
            "averaged {} gradients over {world_size} replicas in {} calls, {} without gradient",
            report.reduced, report.calls, report.skipped,
        );
        Ok(report)
    }
}

struct Bucket<'a> {
    device: Device,
    dt: DigitLayout,
    shape: Vec<usize>,
    nbytes: usize,
    grads: Vec<&'a mut Buffer>,
}

impl<'a> Bucket<'a> {
    fn new(grad: &'a mut Buffer) -> Self {
        Self {
            device: *grad.device(),
            dt: grad.dt(),
            shape: grad.shape().to_vec(),
            nbytes: grad.layout().nbytes(),
            grads: vec![grad],
        }
    }

    fn holds(&self, grad: &Buffer) -> bool {
        *grad.device() == self.device && grad.dt() == self.dt && grad.shape() == self.shape
    }
}
