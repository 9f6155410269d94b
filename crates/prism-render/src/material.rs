// SPDX-License-Identifier: CEPL-1.0
use crate::registry::Registry;

/// A compiled pipeline and the layout it was built against. Both handles are
/// owned by whoever registered the teardown; the material only names them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Material<P, L> {
    pub pipeline: P,
    pub layout: L,
}

impl<P, L> Material<P, L> {
    pub fn new(pipeline: P, layout: L) -> Self {
        Self { pipeline, layout }
    }
}

pub type MaterialRegistry<P, L> = Registry<Material<P, L>>;
