//! Runtime configuration, read from `GPU_BINDER_*` environment variables

use std::{env, str::FromStr};

use crate::{error::BindError, handle::Dim3};

pub const ORDINAL_VAR: &str = "GPU_BINDER_ORDINAL";
pub const DRIVER_INDEX_VAR: &str = "GPU_BINDER_DRIVER_INDEX";
pub const MAX_GROUP_SIZE_VAR: &str = "GPU_BINDER_MAX_GROUP_SIZE";
pub const MAX_TOTAL_GROUP_SIZE_VAR: &str = "GPU_BINDER_MAX_TOTAL_GROUP_SIZE";
pub const HOST_MEMORY_VAR: &str = "GPU_BINDER_HOST_MEMORY";

/// Device limits enforced by the host reference driver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostLimits {
    /// Largest group size accepted in each dimension
    pub max_group_size: Dim3,
    /// Largest accepted product of the three group dimensions
    pub max_total_group_size: u32,
    /// Total bytes of emulated device memory
    pub memory_capacity: usize,
    /// Shared memory available to a single group, in bytes
    pub shared_memory_per_group: usize,
}

impl Default for HostLimits {
    fn default() -> Self {
        Self {
            max_group_size: Dim3::new(1024, 1024, 64),
            max_total_group_size: 1024,
            memory_capacity: 1 << 30,
            shared_memory_per_group: 64 * 1024,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BinderConfig {
    /// Device ordinal within the selected driver
    pub ordinal: i32,
    /// Driver index, only meaningful for Level Zero
    pub driver_index: u32,
    pub host: HostLimits,
}

impl BinderConfig {
    pub fn from_env() -> Result<Self, BindError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source, starting from
    /// the defaults and overriding whatever `lookup` provides
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BindError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ORDINAL_VAR) {
            config.ordinal = parse(ORDINAL_VAR, &value)?;
        }

        if let Some(value) = lookup(DRIVER_INDEX_VAR) {
            config.driver_index = parse(DRIVER_INDEX_VAR, &value)?;
        }

        if let Some(value) = lookup(MAX_GROUP_SIZE_VAR) {
            config.host.max_group_size = parse_dim3(MAX_GROUP_SIZE_VAR, &value)?;
        }

        if let Some(value) = lookup(MAX_TOTAL_GROUP_SIZE_VAR) {
            config.host.max_total_group_size = parse(MAX_TOTAL_GROUP_SIZE_VAR, &value)?;
        }

        if let Some(value) = lookup(HOST_MEMORY_VAR) {
            config.host.memory_capacity = parse(HOST_MEMORY_VAR, &value)?;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, BindError> {
    value.trim().parse().map_err(|_| format!("{name}={value:?} is not a valid value").into())
}

fn parse_dim3(name: &str, value: &str) -> Result<Dim3, BindError> {
    let dims = value.split(',').map(|dim| parse::<u32>(name, dim)).collect::<Result<Vec<_>, _>>()?;

    match dims[..] {
        [x, y, z] => Ok(Dim3::new(x, y, z)),
        _ => Err(format!("{name}={value:?} must have the form x,y,z").into()),
    }
}
