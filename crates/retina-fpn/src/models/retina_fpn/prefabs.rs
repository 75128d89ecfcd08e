//! # `RetinaFpn` Pre-Fabs
//!
//! Named, well-known [`RetinaFpnAbstractConfig`]s.
//!
//! ```rust,no_run
//! use burn::backend::NdArray;
//! use retina_fpn::models::retina_fpn::prefabs::PREFAB_RETINA_FPN_MAP;
//!
//! let prefab = PREFAB_RETINA_FPN_MAP.expect_lookup("retina_fpn50");
//! let model = prefab.new_config().init::<NdArray>(&Default::default());
//! ```

use crate::models::retina_fpn::model::{RetinaFpn, RetinaFpnAbstractConfig};
use burn::config::Config;
use burn::prelude::Backend;
use std::fmt::Debug;

/// RetinaFPN-18 block depths; basic blocks.
pub const RETINA_FPN18_BLOCKS: [usize; 4] = [2, 2, 2, 2];
/// RetinaFPN-34 block depths; basic blocks.
pub const RETINA_FPN34_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// RetinaFPN-50 block depths; bottleneck blocks.
pub const RETINA_FPN50_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// RetinaFPN-101 block depths; bottleneck blocks.
///
/// The first stage has 2 blocks, not the 3 of the standard `ResNet-101`.
pub const RETINA_FPN101_BLOCKS: [usize; 4] = [2, 4, 23, 3];

/// Static builder for a well-known config.
pub struct StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the model config pre-fab.
    pub name: &'static str,

    /// Description of the model config pre-fab.
    pub description: &'static str,

    /// Builder function for the config.
    pub builder: fn() -> C,
}

impl<C> StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Build a new config.
    pub fn new_config(&self) -> C {
        (self.builder)()
    }
}

impl<C> Debug for StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let pretty = f.alternate();

        let type_name = std::any::type_name::<C>();
        let mut handle = f.debug_struct(&format!("StaticPreFabConfig<{type_name}>"));

        handle
            .field("name", &self.name)
            .field("description", &self.description);

        if pretty {
            handle.field("config", &self.new_config());
        }

        handle.finish()
    }
}

/// A named table of [`StaticPreFabConfig`]s.
#[derive(Debug)]
pub struct StaticPreFabMap<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the table.
    pub name: &'static str,

    /// Description of the table.
    pub description: &'static str,

    /// The pre-fabs.
    pub items: &'static [&'static StaticPreFabConfig<C>],
}

impl<C> StaticPreFabMap<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// The names of the pre-fabs, in table order.
    pub fn names(&self) -> Vec<&'static str> {
        self.items.iter().map(|item| item.name).collect()
    }

    /// Look up a pre-fab by name.
    pub fn lookup(
        &self,
        name: &str,
    ) -> Option<&'static StaticPreFabConfig<C>> {
        self.items.iter().find(|item| item.name == name).copied()
    }

    /// Look up a pre-fab by name.
    ///
    /// # Panics
    ///
    /// If there is no pre-fab with that name.
    pub fn expect_lookup(
        &self,
        name: &str,
    ) -> &'static StaticPreFabConfig<C> {
        match self.lookup(name) {
            Some(item) => item,
            None => panic!(
                "no {} prefab named {name:?}; expected one of {:?}",
                self.name,
                self.names()
            ),
        }
    }
}

/// Well-known [`RetinaFpnAbstractConfig`]s.
pub static PREFAB_RETINA_FPN_MAP: StaticPreFabMap<RetinaFpnAbstractConfig> = StaticPreFabMap {
    name: "retina_fpn",
    description: "Well-Known RetinaFPN configs",

    items: &[
        &StaticPreFabConfig {
            name: "retina_fpn18",
            description: "RetinaFPN-18 [2, 2, 2, 2] BasicBlocks",
            builder: RetinaFpnAbstractConfig::retina_fpn18,
        },
        &StaticPreFabConfig {
            name: "retina_fpn34",
            description: "RetinaFPN-34 [3, 4, 6, 3] BasicBlocks",
            builder: RetinaFpnAbstractConfig::retina_fpn34,
        },
        &StaticPreFabConfig {
            name: "retina_fpn50",
            description: "RetinaFPN-50 [3, 4, 6, 3] Bottleneck",
            builder: RetinaFpnAbstractConfig::retina_fpn50,
        },
        &StaticPreFabConfig {
            name: "retina_fpn101",
            description: "RetinaFPN-101 [2, 4, 23, 3] Bottleneck",
            builder: RetinaFpnAbstractConfig::retina_fpn101,
        },
    ],
};

/// Look up a [`RetinaFpnAbstractConfig`] pre-fab by name.
pub fn lookup_prefab(name: &str) -> Option<&'static StaticPreFabConfig<RetinaFpnAbstractConfig>> {
    PREFAB_RETINA_FPN_MAP.lookup(name)
}

impl RetinaFpnAbstractConfig {
    /// RetinaFPN-18; basic blocks.
    pub fn retina_fpn18() -> Self {
        Self::new(RETINA_FPN18_BLOCKS).with_bottleneck(false)
    }

    /// RetinaFPN-34; basic blocks.
    pub fn retina_fpn34() -> Self {
        Self::new(RETINA_FPN34_BLOCKS).with_bottleneck(false)
    }

    /// RetinaFPN-50; bottleneck blocks.
    pub fn retina_fpn50() -> Self {
        Self::new(RETINA_FPN50_BLOCKS).with_bottleneck(true)
    }

    /// RetinaFPN-101; bottleneck blocks.
    pub fn retina_fpn101() -> Self {
        Self::new(RETINA_FPN101_BLOCKS).with_bottleneck(true)
    }
}

/// Initialize a RetinaFPN-50 network.
pub fn retina_fpn50<B: Backend>(device: &B::Device) -> RetinaFpn<B> {
    RetinaFpnAbstractConfig::retina_fpn50().init(device)
}

/// Initialize a RetinaFPN-101 network.
pub fn retina_fpn101<B: Backend>(device: &B::Device) -> RetinaFpn<B> {
    RetinaFpnAbstractConfig::retina_fpn101().init(device)
}
