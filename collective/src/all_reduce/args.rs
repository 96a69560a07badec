use super::{combine, ReduceKind};
use crate::{
    device_mismatch, invalid_argument, type_not_support, utils::layout_distinct, Buffer,
    CommError, Device, TensorLayout,
};
use std::borrow::Borrow;

pub(crate) struct Args<'a, B> {
    pub kind: ReduceKind,
    pub buffers: &'a [B],
    pub device: &'a Device,
    pub scale: f64,
}

pub(crate) struct Meta {
    /// Layout shared by every buffer.
    pub layout: TensorLayout,
    pub count: usize,
}

impl<B: Borrow<Buffer>> Args<'_, B> {
    /// Checks everything that can be checked without talking to peers.
    pub fn meta(&self) -> Result<Meta, CommError> {
        let &Self {
            kind,
            buffers,
            device,
            scale,
        } = self;

        if let Some(other) = buffers
            .iter()
            .map(|b| b.borrow().device())
            .find(|d| *d != device)
        {
            return Err(device_mismatch(format!("{other} vs {device}")));
        }
        let Some(layout) = layout_distinct(buffers.iter().map(|b| b.borrow().layout()))? else {
            return Err(invalid_argument("no buffer to reduce"));
        };

        let dt = layout.dt();
        if !combine::supports(kind, dt) {
            return Err(type_not_support(format!("{kind:?} on {dt:?}")));
        }
        if !scale.is_finite() {
            return Err(invalid_argument(format!("scale {scale} is not finite")));
        }
        if scale != 1. && !combine::is_float(dt) {
            return Err(type_not_support(format!("scaling {dt:?} by {scale}")));
        }

        Ok(Meta {
            layout: layout.clone(),
            count: buffers.len(),
        })
    }
}
