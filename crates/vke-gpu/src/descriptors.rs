//! Descriptor set management.
//!
//! [`DescriptorAllocator`] owns one descriptor pool sized from a list of
//! per-kind ratios. Sets are allocated freely and recycled in bulk by
//! [`DescriptorAllocator::reset`]; the per-frame allocator is reset each
//! time its frame slot comes around, the engine-global one never is.

use ash::vk;

use crate::device::{DescriptorWrite, GpuDevice};
use crate::error::{GpuError, Result};
use crate::resource::GpuResource;

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Create a new builder.
    pub const fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Add a storage buffer binding.
    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    /// Add a uniform buffer binding.
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Add a storage image binding.
    pub fn storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_IMAGE, 1, stage_flags)
    }

    /// Add a sampled image binding.
    pub fn sampled_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    /// Build the descriptor set layout.
    pub fn build<D: GpuDevice>(self, device: &D) -> Result<DescriptorLayout> {
        let handle = device.create_descriptor_set_layout(&self.bindings)?;

        let mut counts: Vec<(vk::DescriptorType, u32)> = Vec::new();
        for binding in &self.bindings {
            match counts
                .iter_mut()
                .find(|(kind, _)| *kind == binding.descriptor_type)
            {
                Some((_, count)) => *count += binding.descriptor_count,
                None => counts.push((binding.descriptor_type, binding.descriptor_count)),
            }
        }

        Ok(DescriptorLayout { handle, counts })
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// A descriptor set layout plus the number of descriptors of each kind one
/// set of this layout consumes.
#[derive(Debug, Clone)]
pub struct DescriptorLayout {
    pub handle: vk::DescriptorSetLayout,
    pub counts: Vec<(vk::DescriptorType, u32)>,
}

impl DescriptorLayout {
    /// Hand the layout handle to a deletion queue.
    pub fn into_resource(self) -> GpuResource {
        GpuResource::DescriptorSetLayout(self.handle)
    }
}

/// Share of the pool's set budget given to one descriptor kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSizeRatio {
    pub kind: vk::DescriptorType,
    pub ratio: f32,
}

impl PoolSizeRatio {
    pub const fn new(kind: vk::DescriptorType, ratio: f32) -> Self {
        Self { kind, ratio }
    }
}

/// A set handed out by a [`DescriptorAllocator`].
///
/// The set is only valid until its allocator is next reset; use
/// [`DescriptorAllocator::is_live`] to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSet {
    pub handle: vk::DescriptorSet,
    generation: u64,
}

impl DescriptorSet {
    /// Reset cycle this set was allocated in.
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    kind: vk::DescriptorType,
    capacity: u32,
    used: u32,
}

/// Pool-backed descriptor set allocator with bulk reset.
#[derive(Debug)]
pub struct DescriptorAllocator {
    pool: vk::DescriptorPool,
    max_sets: u32,
    allocated_sets: u32,
    buckets: Vec<Bucket>,
    generation: u64,
}

impl DescriptorAllocator {
    /// Create a pool holding `max_sets` sets, with `ratio * max_sets`
    /// descriptors of each listed kind.
    pub fn new<D: GpuDevice>(device: &D, max_sets: u32, ratios: &[PoolSizeRatio]) -> Result<Self> {
        if max_sets == 0 {
            return Err(GpuError::PoolCreation(
                "max_sets must be non-zero".to_string(),
            ));
        }
        if ratios.is_empty() {
            return Err(GpuError::PoolCreation(
                "at least one pool size ratio is required".to_string(),
            ));
        }

        let mut buckets: Vec<Bucket> = Vec::with_capacity(ratios.len());
        for ratio in ratios {
            let capacity = bucket_capacity(ratio.ratio, max_sets);
            if capacity == 0 {
                return Err(GpuError::PoolCreation(format!(
                    "ratio {} for {:?} provisions no descriptors",
                    ratio.ratio, ratio.kind
                )));
            }
            match buckets.iter_mut().find(|b| b.kind == ratio.kind) {
                Some(bucket) => bucket.capacity += capacity,
                None => buckets.push(Bucket {
                    kind: ratio.kind,
                    capacity,
                    used: 0,
                }),
            }
        }

        let sizes: Vec<vk::DescriptorPoolSize> = buckets
            .iter()
            .map(|b| vk::DescriptorPoolSize {
                ty: b.kind,
                descriptor_count: b.capacity,
            })
            .collect();

        let pool = device
            .create_descriptor_pool(max_sets, &sizes)
            .map_err(|e| GpuError::PoolCreation(e.to_string()))?;

        tracing::debug!(
            "Descriptor pool created: {max_sets} sets, {} descriptor kinds",
            buckets.len()
        );

        Ok(Self {
            pool,
            max_sets,
            allocated_sets: 0,
            buckets,
            generation: 0,
        })
    }

    /// Allocate one set of the given layout.
    pub fn allocate<D: GpuDevice>(
        &mut self,
        device: &D,
        layout: &DescriptorLayout,
    ) -> Result<DescriptorSet> {
        if self.allocated_sets >= self.max_sets {
            return Err(GpuError::AllocationExhausted(format!(
                "pool holds at most {} sets",
                self.max_sets
            )));
        }

        // Check every kind before touching any bucket.
        let mut claims = Vec::with_capacity(layout.counts.len());
        for &(kind, count) in &layout.counts {
            let index = self
                .buckets
                .iter()
                .position(|b| b.kind == kind)
                .ok_or_else(|| {
                    GpuError::AllocationExhausted(format!("pool provisions no {kind:?} descriptors"))
                })?;
            let bucket = &self.buckets[index];
            if bucket.used + count > bucket.capacity {
                return Err(GpuError::AllocationExhausted(format!(
                    "{kind:?}: {} of {} in use, {count} requested",
                    bucket.used, bucket.capacity
                )));
            }
            claims.push((index, count));
        }

        let handle = device
            .allocate_descriptor_set(self.pool, layout.handle)
            .map_err(|e| match e {
                GpuError::Vulkan(result) | GpuError::Call { result, .. }
                    if is_pool_exhaustion(result) =>
                {
                    GpuError::AllocationExhausted(format!("device reported {result:?}"))
                }
                other => other,
            })?;

        for (index, count) in claims {
            self.buckets[index].used += count;
        }
        self.allocated_sets += 1;

        Ok(DescriptorSet {
            handle,
            generation: self.generation,
        })
    }

    /// Return every set to the pool at once.
    ///
    /// Sets allocated before the reset become invalid. Resetting a pool with
    /// nothing allocated does nothing.
    pub fn reset<D: GpuDevice>(&mut self, device: &D) -> Result<()> {
        if self.allocated_sets == 0 {
            return Ok(());
        }
        device.reset_descriptor_pool(self.pool)?;
        for bucket in &mut self.buckets {
            bucket.used = 0;
        }
        self.allocated_sets = 0;
        self.generation += 1;
        Ok(())
    }

    /// Whether `set` was allocated since the last reset.
    pub const fn is_live(&self, set: &DescriptorSet) -> bool {
        set.generation == self.generation
    }

    /// Release the pool. Every set allocated from it becomes invalid.
    pub fn destroy<D: GpuDevice>(self, device: &D) -> Result<()> {
        device.destroy(GpuResource::DescriptorPool(self.pool))
    }

    /// Get the raw pool handle.
    pub const fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Maximum number of concurrently allocated sets.
    pub const fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Sets allocated since the last reset.
    pub const fn allocated_sets(&self) -> u32 {
        self.allocated_sets
    }

    /// Descriptors of `kind` still available before the next reset.
    pub fn remaining(&self, kind: vk::DescriptorType) -> u32 {
        self.buckets
            .iter()
            .find(|b| b.kind == kind)
            .map_or(0, |b| b.capacity - b.used)
    }

    /// Number of completed resets.
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn bucket_capacity(ratio: f32, max_sets: u32) -> u32 {
    if !ratio.is_finite() || ratio <= 0.0 {
        return 0;
    }
    (ratio * max_sets as f32) as u32
}

const fn is_pool_exhaustion(result: vk::Result) -> bool {
    matches!(
        result,
        vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL
    )
}

/// Collects descriptor writes and applies them to a set in one call.
#[derive(Debug, Default)]
pub struct DescriptorWriter {
    writes: Vec<DescriptorWrite>,
}

impl DescriptorWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a uniform buffer descriptor.
    pub fn uniform_buffer(self, binding: u32, buffer: vk::Buffer, offset: u64, range: u64) -> Self {
        self.buffer(binding, vk::DescriptorType::UNIFORM_BUFFER, buffer, offset, range)
    }

    /// Write a storage buffer descriptor.
    pub fn storage_buffer(self, binding: u32, buffer: vk::Buffer, offset: u64, range: u64) -> Self {
        self.buffer(binding, vk::DescriptorType::STORAGE_BUFFER, buffer, offset, range)
    }

    /// Write a storage image descriptor.
    pub fn storage_image(self, binding: u32, view: vk::ImageView, layout: vk::ImageLayout) -> Self {
        self.image(
            binding,
            vk::DescriptorType::STORAGE_IMAGE,
            view,
            vk::Sampler::null(),
            layout,
        )
    }

    /// Write a combined image sampler descriptor.
    pub fn sampled_image(
        self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Self {
        self.image(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            view,
            sampler,
            layout,
        )
    }

    fn buffer(
        mut self,
        binding: u32,
        kind: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    ) -> Self {
        self.writes.push(DescriptorWrite::Buffer {
            binding,
            kind,
            buffer,
            offset,
            range,
        });
        self
    }

    fn image(
        mut self,
        binding: u32,
        kind: vk::DescriptorType,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Self {
        self.writes.push(DescriptorWrite::Image {
            binding,
            kind,
            view,
            sampler,
            layout,
        });
        self
    }

    /// Number of pending writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether no writes are pending.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Apply all writes to `set`.
    pub fn update<D: GpuDevice>(&self, device: &D, set: &DescriptorSet) {
        device.update_descriptor_set(set.handle, &self.writes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    fn uniform_layout(device: &MockDevice) -> DescriptorLayout {
        DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .build(device)
            .unwrap()
    }

    fn storage_image_layout(device: &MockDevice) -> DescriptorLayout {
        DescriptorSetLayoutBuilder::new()
            .storage_image(0, vk::ShaderStageFlags::COMPUTE)
            .build(device)
            .unwrap()
    }

    #[test]
    fn builder_aggregates_counts_per_kind() {
        let device = MockDevice::new();
        let layout = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .uniform_buffer(1, vk::ShaderStageFlags::FRAGMENT)
            .storage_image(2, vk::ShaderStageFlags::COMPUTE)
            .build(&device)
            .unwrap();

        assert_eq!(
            layout.counts,
            vec![
                (vk::DescriptorType::UNIFORM_BUFFER, 2),
                (vk::DescriptorType::STORAGE_IMAGE, 1)
            ]
        );
    }

    #[test]
    fn capacity_follows_ratio_times_max_sets() {
        let device = MockDevice::new();
        let allocator = DescriptorAllocator::new(
            &device,
            10,
            &[
                PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 0.5),
                PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 3.0),
            ],
        )
        .unwrap();

        assert_eq!(allocator.remaining(vk::DescriptorType::UNIFORM_BUFFER), 5);
        assert_eq!(allocator.remaining(vk::DescriptorType::STORAGE_IMAGE), 30);
        assert_eq!(allocator.remaining(vk::DescriptorType::SAMPLER), 0);
    }

    #[test]
    fn rejects_degenerate_configurations() {
        let device = MockDevice::new();
        let ratio = [PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0)];

        assert!(matches!(
            DescriptorAllocator::new(&device, 0, &ratio),
            Err(GpuError::PoolCreation(_))
        ));
        assert!(matches!(
            DescriptorAllocator::new(&device, 4, &[]),
            Err(GpuError::PoolCreation(_))
        ));
        assert!(matches!(
            DescriptorAllocator::new(
                &device,
                4,
                &[PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 0.1)]
            ),
            Err(GpuError::PoolCreation(_))
        ));
    }

    #[test]
    fn device_rejection_surfaces_as_pool_creation() {
        let device = MockDevice::new();
        device.set_max_descriptor_pool_sets(8);
        let result = DescriptorAllocator::new(
            &device,
            16,
            &[PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0)],
        );
        assert!(matches!(result, Err(GpuError::PoolCreation(_))));
    }

    #[test]
    fn exhausting_one_kind_fails_without_touching_others() {
        let device = MockDevice::new();
        let mut allocator = DescriptorAllocator::new(
            &device,
            4,
            &[
                PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 0.5),
                PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0),
            ],
        )
        .unwrap();
        let uniform = uniform_layout(&device);
        let image = storage_image_layout(&device);

        allocator.allocate(&device, &uniform).unwrap();
        allocator.allocate(&device, &uniform).unwrap();
        let err = allocator.allocate(&device, &uniform).unwrap_err();

        assert!(matches!(err, GpuError::AllocationExhausted(_)));
        assert_eq!(allocator.allocated_sets(), 2);
        assert_eq!(allocator.remaining(vk::DescriptorType::STORAGE_IMAGE), 4);
        allocator.allocate(&device, &image).unwrap();
    }

    #[test]
    fn set_budget_is_enforced() {
        let device = MockDevice::new();
        let mut allocator = DescriptorAllocator::new(
            &device,
            2,
            &[PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 4.0)],
        )
        .unwrap();
        let layout = uniform_layout(&device);

        allocator.allocate(&device, &layout).unwrap();
        allocator.allocate(&device, &layout).unwrap();
        assert!(matches!(
            allocator.allocate(&device, &layout),
            Err(GpuError::AllocationExhausted(_))
        ));
    }

    #[test]
    fn reset_invalidates_sets_and_restores_capacity() {
        let device = MockDevice::new();
        let mut allocator = DescriptorAllocator::new(
            &device,
            3,
            &[PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0)],
        )
        .unwrap();
        let layout = uniform_layout(&device);

        let before: Vec<_> = (0..3)
            .map(|_| allocator.allocate(&device, &layout).unwrap())
            .collect();
        allocator.reset(&device).unwrap();

        assert!(before.iter().all(|set| !allocator.is_live(set)));
        for _ in 0..3 {
            let set = allocator.allocate(&device, &layout).unwrap();
            assert!(allocator.is_live(&set));
        }
        assert_eq!(allocator.generation(), 1);
    }

    #[test]
    fn resetting_empty_pool_is_a_no_op() {
        let device = MockDevice::new();
        let mut allocator = DescriptorAllocator::new(
            &device,
            3,
            &[PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0)],
        )
        .unwrap();

        allocator.reset(&device).unwrap();

        assert_eq!(allocator.generation(), 0);
        assert_eq!(device.call_count("reset_descriptor_pool"), 0);
    }

    #[test]
    fn destroy_releases_the_pool() {
        let device = MockDevice::new();
        let allocator = DescriptorAllocator::new(
            &device,
            3,
            &[PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0)],
        )
        .unwrap();

        allocator.destroy(&device).unwrap();
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn writer_applies_all_writes_in_one_update() {
        let device = MockDevice::new();
        let mut allocator = DescriptorAllocator::new(
            &device,
            1,
            &[PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 2.0)],
        )
        .unwrap();
        let layout = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .uniform_buffer(1, vk::ShaderStageFlags::COMPUTE)
            .build(&device)
            .unwrap();
        let set = allocator.allocate(&device, &layout).unwrap();

        let writer = DescriptorWriter::new()
            .uniform_buffer(0, vk::Buffer::null(), 0, 64)
            .uniform_buffer(1, vk::Buffer::null(), 64, 64);
        writer.update(&device, &set);

        assert_eq!(writer.len(), 2);
        assert_eq!(device.call_count("update_descriptor_set"), 1);
    }
}
