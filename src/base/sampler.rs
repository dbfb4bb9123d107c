/// Texel filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Linear,
    Nearest,
}

/// Behavior when sampling outside the [0, 1] texture coordinate range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    ClampToBorder,
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

/// Border color used by `AddressMode::ClampToBorder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorderColor {
    #[default]
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

/// Value-type bundle of sampler state. Two samplers with equal state share a
/// realized GPU sampler object, keyed by `key()`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AbstractSampler {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub border_color: BorderColor,
    pub anisotropic_filtering: bool,
}

impl AbstractSampler {
    pub fn new() -> AbstractSampler {
        AbstractSampler::default()
    }

    /// Stable 32-bit key packing every field. Layout, low bit first:
    /// min filter (1), mag filter (1), mipmap filter (1), address mode u
    /// (2), address mode v (2), border color (2), anisotropy (1).
    pub fn key(&self) -> u32 {
        let mut key = filter_bits(self.min_filter);
        key |= filter_bits(self.mag_filter) << 1;
        key |= filter_bits(self.mipmap_filter) << 2;
        key |= address_bits(self.address_mode_u) << 3;
        key |= address_bits(self.address_mode_v) << 5;
        key |= border_bits(self.border_color) << 7;
        key |= (self.anisotropic_filtering as u32) << 9;
        key
    }
}

fn filter_bits(mode: FilterMode) -> u32 {
    match mode {
        FilterMode::Linear => 0,
        FilterMode::Nearest => 1,
    }
}

fn address_bits(mode: AddressMode) -> u32 {
    match mode {
        AddressMode::ClampToBorder => 0,
        AddressMode::ClampToEdge => 1,
        AddressMode::Repeat => 2,
        AddressMode::MirroredRepeat => 3,
    }
}

fn border_bits(color: BorderColor) -> u32 {
    match color {
        BorderColor::TransparentBlack => 0,
        BorderColor::OpaqueBlack => 1,
        BorderColor::OpaqueWhite => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_samplers_share_a_key() {
        let a = AbstractSampler::new();
        let b = AbstractSampler::new();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), 0);
    }

    #[test]
    fn every_field_reaches_the_key() {
        let base = AbstractSampler::new();
        let variants = [
            AbstractSampler {
                min_filter: FilterMode::Nearest,
                ..AbstractSampler::new()
            },
            AbstractSampler {
                mag_filter: FilterMode::Nearest,
                ..AbstractSampler::new()
            },
            AbstractSampler {
                mipmap_filter: FilterMode::Nearest,
                ..AbstractSampler::new()
            },
            AbstractSampler {
                address_mode_u: AddressMode::Repeat,
                ..AbstractSampler::new()
            },
            AbstractSampler {
                address_mode_v: AddressMode::MirroredRepeat,
                ..AbstractSampler::new()
            },
            AbstractSampler {
                border_color: BorderColor::OpaqueWhite,
                ..AbstractSampler::new()
            },
            AbstractSampler {
                anisotropic_filtering: true,
                ..AbstractSampler::new()
            },
        ];
        let mut keys: Vec<u32> = variants.iter().map(|s| s.key()).collect();
        keys.push(base.key());
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), variants.len() + 1);
    }
}
