use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::base::sampler::{AbstractSampler, AddressMode, BorderColor, FilterMode};
use crate::render::RenderDevice;

/// Refcounted cache of realized sampler objects keyed by the 32-bit
/// AbstractSampler key. Generic over the realized type so the refcount
/// discipline is testable without a device.
pub struct SamplerCache<S> {
    map: Mutex<HashMap<u32, (usize, Arc<S>)>>,
}

impl<S> Default for SamplerCache<S> {
    fn default() -> Self {
        SamplerCache {
            map: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> SamplerCache<S> {
    pub fn new() -> SamplerCache<S> {
        SamplerCache::default()
    }

    /// Returns the cached object for `key`, bumping its refcount, or
    /// realizes a new one with refcount 1.
    pub fn acquire(&self, key: u32, realize: impl FnOnce() -> S) -> Arc<S> {
        let mut map = self.map.lock();
        let entry = map
            .entry(key)
            .or_insert_with(|| (0, Arc::new(realize())));
        entry.0 += 1;
        entry.1.clone()
    }

    /// Drops one reference; at zero the entry leaves the cache and the
    /// realized object is destroyed with its last Arc.
    pub fn release(&self, key: u32) {
        let mut map = self.map.lock();
        if let Some(entry) = map.get_mut(&key) {
            entry.0 -= 1;
            if entry.0 == 0 {
                map.remove(&key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

/// Device-backed sampler factory. ScinthDefs hold the returned `SamplerRef`
/// guards; dropping the last guard for a key destroys the GPU sampler.
pub struct SamplerFactory {
    cache: SamplerCache<wgpu::Sampler>,
    supports_border: bool,
}

impl SamplerFactory {
    pub fn new(supports_border: bool) -> SamplerFactory {
        SamplerFactory {
            cache: SamplerCache::new(),
            supports_border,
        }
    }

    /// Acquires the shared sampler for this state, realizing it on first
    /// use. The factory travels by Arc so the returned guard can release
    /// its reference on drop.
    pub fn get_sampler(
        factory: &Arc<SamplerFactory>,
        device: &RenderDevice,
        abstract_sampler: &AbstractSampler,
    ) -> SamplerRef {
        let key = abstract_sampler.key();
        let sampler = factory
            .cache
            .acquire(key, || factory.realize(device, abstract_sampler));
        SamplerRef {
            key,
            sampler,
            factory: factory.clone(),
        }
    }

    pub fn cached_samplers(&self) -> usize {
        self.cache.len()
    }

    fn realize(&self, device: &RenderDevice, abstract_sampler: &AbstractSampler) -> wgpu::Sampler {
        let border_color = match abstract_sampler.border_color {
            BorderColor::TransparentBlack => wgpu::SamplerBorderColor::TransparentBlack,
            BorderColor::OpaqueBlack => wgpu::SamplerBorderColor::OpaqueBlack,
            BorderColor::OpaqueWhite => wgpu::SamplerBorderColor::OpaqueWhite,
        };
        device.create_sampler(&wgpu::SamplerDescriptor {
            label: None,
            address_mode_u: self.address_mode(abstract_sampler.address_mode_u),
            address_mode_v: self.address_mode(abstract_sampler.address_mode_v),
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter_mode(abstract_sampler.mag_filter),
            min_filter: filter_mode(abstract_sampler.min_filter),
            mipmap_filter: filter_mode(abstract_sampler.mipmap_filter),
            anisotropy_clamp: if abstract_sampler.anisotropic_filtering {
                std::num::NonZeroU8::new(16)
            } else {
                None
            },
            border_color: if self.supports_border {
                Some(border_color)
            } else {
                None
            },
            ..Default::default()
        })
    }

    fn address_mode(&self, mode: AddressMode) -> wgpu::AddressMode {
        match mode {
            // Without border support the nearest equivalent is edge clamping.
            AddressMode::ClampToBorder if !self.supports_border => wgpu::AddressMode::ClampToEdge,
            AddressMode::ClampToBorder => wgpu::AddressMode::ClampToBorder,
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
        }
    }
}

fn filter_mode(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Linear => wgpu::FilterMode::Linear,
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
    }
}

/// RAII guard for one cache reference.
pub struct SamplerRef {
    key: u32,
    sampler: Arc<wgpu::Sampler>,
    factory: Arc<SamplerFactory>,
}

impl SamplerRef {
    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }
}

impl Drop for SamplerRef {
    fn drop(&mut self) {
        self.factory.cache.release(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_deduplicates_by_key() {
        let cache: SamplerCache<u32> = SamplerCache::new();
        let mut realized = 0;
        let first = cache.acquire(7, || {
            realized += 1;
            42
        });
        let second = cache.acquire(7, || {
            realized += 1;
            43
        });
        assert_eq!(*first, 42);
        assert_eq!(*second, 42);
        assert_eq!(realized, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn matched_release_empties_the_cache() {
        let cache: SamplerCache<&'static str> = SamplerCache::new();
        cache.acquire(1, || "a");
        cache.acquire(1, || "a");
        cache.acquire(2, || "b");

        cache.release(1);
        assert_eq!(cache.len(), 2);
        cache.release(1);
        assert_eq!(cache.len(), 1);
        cache.release(2);
        assert!(cache.is_empty());
    }

    #[test]
    fn release_of_unknown_key_is_harmless() {
        let cache: SamplerCache<u32> = SamplerCache::new();
        cache.release(99);
        assert!(cache.is_empty());
    }

    #[test]
    fn distinct_keys_realize_distinct_entries() {
        let cache: SamplerCache<u32> = SamplerCache::new();
        cache.acquire(1, || 1);
        cache.acquire(2, || 2);
        assert_eq!(cache.len(), 2);
    }
}
