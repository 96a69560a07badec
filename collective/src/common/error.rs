use std::{error::Error, fmt};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CommErrorKind {
    InvalidGroupSpec,
    FeatureNotSupported,
    DeviceMismatch,
    ShapeMismatch,
    OutputSizeMismatch,
    TypeNotSupport,
    InvalidArgument,
    ProtocolViolation,
    Timeout,
}

#[derive(Clone, Debug)]
pub struct CommError {
    pub kind: CommErrorKind,
    pub info: String,
}

impl CommError {
    #[inline]
    pub fn kind(&self) -> CommErrorKind {
        self.kind
    }
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.info.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.info)
        }
    }
}

impl Error for CommError {}

pub(super) mod functions {
    use super::{CommError, CommErrorKind::*};

    macro_rules! builder {
        ($ty:ident: $name:ident $kind:expr) => {
            #[inline]
            pub fn $name(info: impl Into<String>) -> $ty {
                $ty {
                    kind: $kind,
                    info: info.into(),
                }
            }
        };
    }

    builder!(CommError: invalid_group_spec    InvalidGroupSpec   );
    builder!(CommError: feature_not_supported FeatureNotSupported);
    builder!(CommError: device_mismatch       DeviceMismatch     );
    builder!(CommError: shape_mismatch        ShapeMismatch      );
    builder!(CommError: output_size_mismatch  OutputSizeMismatch );
    builder!(CommError: type_not_support      TypeNotSupport     );
    builder!(CommError: invalid_argument      InvalidArgument    );

    builder!(CommError: protocol_violation    ProtocolViolation  );
    builder!(CommError: timeout               Timeout            );
}

#[test]
fn test_display() {
    use super::{shape_mismatch, CommErrorKind::ShapeMismatch};

    let e = shape_mismatch("[2, 3] vs [3, 2]");
    assert_eq!(e.kind(), ShapeMismatch);
    assert_eq!(e.to_string(), "ShapeMismatch: [2, 3] vs [3, 2]");
}
