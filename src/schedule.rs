//! Launch geometry: splitting a global work size into blocks and a grid

use crate::handle::Dim3;

/// Most threads a block may have in its z dimension
pub const MAX_BLOCK_Z: u32 = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LaunchDims {
    pub grid: Dim3,
    pub block: Dim3,
}

fn floor_pow2(n: u32) -> u32 {
    if n == 0 { 0 } else { 1 << n.ilog2() }
}

/// Distribute a budget of `max_threads` threads across the dimensions
/// of `global`
///
/// Every block dimension is a power of two no larger than the matching
/// global dimension, z never exceeds [`MAX_BLOCK_Z`], and the budget is
/// split as evenly as possible between dimensions with more than one
/// work item.
pub fn block_dims(global: Dim3, max_threads: u32) -> Dim3 {
    let budget = floor_pow2(max_threads.max(1));
    let global = [global.x, global.y, global.z];
    let caps = [u32::MAX, u32::MAX, MAX_BLOCK_Z];

    let limit = |d: usize| floor_pow2(global[d].min(caps[d]).max(1));

    let active = global.iter().filter(|&&g| g > 1).count() as u32;
    let mut block = [1u32; 3];

    if active > 0 {
        let bits = budget.ilog2();
        let (share, extra) = (bits / active, bits % active);

        let mut seen = 0;
        for d in 0..3 {
            if global[d] > 1 {
                let exp = share + u32::from(seen < extra);
                block[d] = (1 << exp).min(limit(d));
                seen += 1;
            }
        }

        // hand budget freed by clamping back to dimensions with room
        for d in 0..3 {
            while block[d] <= limit(d) / 2 && block.iter().product::<u32>() <= budget / 2 {
                block[d] *= 2;
            }
        }
    }

    Dim3::from(block)
}

/// Blocks needed to cover `global`, rounding up in each dimension
pub fn grid_dims(global: Dim3, block: Dim3) -> Dim3 {
    let div = |g: u32, b: u32| g.div_ceil(b.max(1)).max(1);
    Dim3::new(div(global.x, block.x), div(global.y, block.y), div(global.z, block.z))
}

pub fn launch_dims(global: Dim3, max_threads: u32) -> LaunchDims {
    let block = block_dims(global, max_threads);
    LaunchDims { grid: grid_dims(global, block), block }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_dimensional() {
        assert_eq!(block_dims(Dim3::linear(1 << 20), 1024), Dim3::linear(1024));
        assert_eq!(block_dims(Dim3::linear(100), 1024), Dim3::linear(64));
        assert_eq!(block_dims(Dim3::linear(1), 1024), Dim3::ONE);
    }

    #[test]
    fn budget_is_split_between_dimensions() {
        assert_eq!(block_dims(Dim3::new(4096, 4096, 1), 1024), Dim3::new(32, 32, 1));
        assert_eq!(block_dims(Dim3::new(512, 512, 512), 1024), Dim3::new(16, 8, 8));
    }

    #[test]
    fn clamped_dimensions_release_budget() {
        assert_eq!(block_dims(Dim3::new(4096, 2, 1), 1024), Dim3::new(512, 2, 1));
        assert_eq!(block_dims(Dim3::new(2, 2, 4096), 1024), Dim3::new(2, 2, 64));
    }

    #[test]
    fn non_power_of_two_budget() {
        let block = block_dims(Dim3::linear(4096), 768);
        assert_eq!(block, Dim3::linear(512));
    }

    #[test]
    fn full_u32_budget() {
        assert_eq!(block_dims(Dim3::new(65536, 65536, 1), u32::MAX), Dim3::new(65536, 32768, 1));
        assert_eq!(block_dims(Dim3::linear(u32::MAX), u32::MAX), Dim3::linear(1 << 31));

        let dims = launch_dims(Dim3::linear(u32::MAX), u32::MAX);
        assert_eq!(dims.grid, Dim3::linear(2));
    }

    #[test]
    fn grid_rounds_up() {
        let dims = launch_dims(Dim3::new(1000, 3, 1), 256);
        assert!(dims.block.volume() <= 256);
        assert!(dims.grid.x * dims.block.x >= 1000);
        assert!(dims.grid.y * dims.block.y >= 3);
        assert_eq!(grid_dims(Dim3::linear(1025), Dim3::linear(1024)), Dim3::new(2, 1, 1));
        assert_eq!(grid_dims(Dim3::new(0, 1, 1), Dim3::ONE), Dim3::ONE);
    }
}
