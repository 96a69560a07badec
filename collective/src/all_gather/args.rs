use super::normalize_dim;
use crate::{
    device_mismatch, invalid_argument, output_size_mismatch, shape_mismatch, Buffer, CommError,
    Device, TensorLayout,
};
use std::iter::zip;

pub(crate) struct Args<'a> {
    pub buffer: &'a Buffer,
    pub dim: isize,
    pub device: &'a Device,
    pub output: Option<&'a Buffer>,
    /// Number of participants in the group.
    pub shards: usize,
}

pub(crate) struct Meta {
    pub dim: usize,
    /// Layout of the concatenated result.
    pub layout: TensorLayout,
}

impl Args<'_> {
    pub fn meta(&self) -> Result<Meta, CommError> {
        let &Self {
            buffer,
            dim,
            device,
            output,
            shards,
        } = self;

        if buffer.device() != device {
            return Err(device_mismatch(format!("{} vs {device}", buffer.device())));
        }
        let layout = buffer.layout();
        let Some(dim) = normalize_dim(dim, layout.ndim()) else {
            return Err(invalid_argument(format!(
                "dim {dim} out of range for {}-d buffer",
                layout.ndim()
            )));
        };
        let gathered = layout.repeated(dim, shards);

        if let Some(output) = output {
            if output.device() != device {
                return Err(device_mismatch(format!("output on {}", output.device())));
            }
            let out = output.layout();
            if out.dt() != layout.dt() || out.ndim() != layout.ndim() {
                return Err(shape_mismatch(format!(
                    "output {:?}{:?} for input {:?}{:?}",
                    out.dt(),
                    out.shape(),
                    layout.dt(),
                    layout.shape(),
                )));
            }
            for (i, (&o, &x)) in zip(out.shape(), layout.shape()).enumerate() {
                if i != dim && o != x {
                    return Err(shape_mismatch(format!(
                        "output axis {i} is {o}, input has {x}"
                    )));
                }
            }
            let expect = gathered.shape()[dim];
            let actual = out.shape()[dim];
            if actual != expect {
                return Err(output_size_mismatch(format!(
                    "output axis {dim} is {actual}, {shards} shards need {expect}"
                )));
            }
        }

        Ok(Meta {
            dim,
            layout: gathered,
        })
    }
}
