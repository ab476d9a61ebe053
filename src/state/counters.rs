//! Address-generation counters.
//!
//! Each thread owns one set of read/write counters (RWC) used by the matrix
//! and vector units, and one ADC bank with counters for both unpackers and
//! the packers. Counter widths match the hardware registers; arithmetic
//! wraps within those widths.

use crate::error::Result;
use crate::state::ConfigStore;

const SRC_COUNTER_MASK: u32 = 0x3F;
const DST_COUNTER_MASK: u32 = 0x3FF;
const FIDELITY_MASK: u32 = 0x3;

/// Read/write counters of one thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rwc {
    pub src_a: u32,
    pub src_a_cr: u32,
    pub src_b: u32,
    pub src_b_cr: u32,
    pub dst: u32,
    pub dst_cr: u32,
    pub fidelity_phase: u32,
    /// Bit 2 of the most recent address-mod selector
    pub extra_addr_mod: bool,
}

impl Rwc {
    pub fn set_src_a(&mut self, value: u32) {
        self.src_a = value & SRC_COUNTER_MASK;
    }

    pub fn set_src_a_cr(&mut self, value: u32) {
        self.src_a_cr = value & SRC_COUNTER_MASK;
    }

    pub fn set_src_b(&mut self, value: u32) {
        self.src_b = value & SRC_COUNTER_MASK;
    }

    pub fn set_src_b_cr(&mut self, value: u32) {
        self.src_b_cr = value & SRC_COUNTER_MASK;
    }

    pub fn set_dst(&mut self, value: u32) {
        self.dst = value & DST_COUNTER_MASK;
    }

    pub fn set_dst_cr(&mut self, value: u32) {
        self.dst_cr = value & DST_COUNTER_MASK;
    }

    /// Advance the counters by one of the thread's ADDR_MOD slots.
    ///
    /// Slots 4-7 are used when `ADDR_MOD_SET_Base` is set or the selector
    /// carries bit 2. The vector unit leaves the fidelity phase alone.
    pub fn apply_addr_mod(
        &mut self,
        cfg: &ConfigStore,
        thread: usize,
        addr_mod: u32,
        update_fidelity: bool,
    ) -> Result<()> {
        self.extra_addr_mod = addr_mod & 0x4 != 0;
        let mut index = addr_mod & 0x3;
        if cfg.thread_value(thread, "ADDR_MOD_SET_Base")? != 0 || self.extra_addr_mod {
            index += 4;
        }

        let ab = |field: &str| cfg.thread_value(thread, &format!("ADDR_MOD_AB_SEC{}_{}", index, field));
        let dst = |field: &str| cfg.thread_value(thread, &format!("ADDR_MOD_DST_SEC{}_{}", index, field));

        let src_a_incr = ab("SrcAIncr")?;
        if ab("SrcAClear")? != 0 {
            self.src_a = 0;
            self.src_a_cr = 0;
        } else if ab("SrcACR")? != 0 {
            self.set_src_a_cr(self.src_a_cr + src_a_incr);
            self.src_a = self.src_a_cr;
        } else {
            self.set_src_a(self.src_a + src_a_incr);
        }

        let src_b_incr = ab("SrcBIncr")?;
        if ab("SrcBClear")? != 0 {
            self.src_b = 0;
            self.src_b_cr = 0;
        } else if ab("SrcBCR")? != 0 {
            self.set_src_b_cr(self.src_b_cr + src_b_incr);
            self.src_b = self.src_b_cr;
        } else {
            self.set_src_b(self.src_b + src_b_incr);
        }

        let dst_incr = dst("DestIncr")?;
        if dst("DestClear")? != 0 {
            self.dst = 0;
            self.dst_cr = 0;
        } else if dst("DestCToCR")? != 0 {
            self.set_dst(self.dst + dst_incr);
            self.dst_cr = self.dst;
        } else if dst("DestCR")? != 0 {
            self.set_dst_cr(self.dst_cr + dst_incr);
            self.dst = self.dst_cr;
        } else {
            self.set_dst(self.dst + dst_incr);
        }

        if update_fidelity {
            if dst("FidelityClear")? != 0 {
                self.fidelity_phase = 0;
            } else {
                self.fidelity_phase = (self.fidelity_phase + dst("FidelityIncr")?) & FIDELITY_MASK;
            }
        }
        Ok(())
    }
}

/// One ADC dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    X,
    Y,
    Z,
    W,
}

impl Dim {
    pub fn from_index(index: u32) -> Self {
        match index & 3 {
            0 => Dim::X,
            1 => Dim::Y,
            2 => Dim::Z,
            _ => Dim::W,
        }
    }

    fn mask(self) -> u32 {
        match self {
            Dim::X => 0x3FFFF,
            Dim::Y => 0x1FFF,
            Dim::Z | Dim::W => 0xFF,
        }
    }
}

/// One ADC channel: X/Y/Z/W plus their carry-shadow registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdcChannel {
    pub x: u32,
    pub x_cr: u32,
    pub y: u32,
    pub y_cr: u32,
    pub z: u32,
    pub z_cr: u32,
    pub w: u32,
    pub w_cr: u32,
}

impl AdcChannel {
    fn slots(&mut self, dim: Dim) -> (&mut u32, &mut u32) {
        match dim {
            Dim::X => (&mut self.x, &mut self.x_cr),
            Dim::Y => (&mut self.y, &mut self.y_cr),
            Dim::Z => (&mut self.z, &mut self.z_cr),
            Dim::W => (&mut self.w, &mut self.w_cr),
        }
    }

    pub fn get(&self, dim: Dim) -> u32 {
        match dim {
            Dim::X => self.x,
            Dim::Y => self.y,
            Dim::Z => self.z,
            Dim::W => self.w,
        }
    }

    pub fn get_cr(&self, dim: Dim) -> u32 {
        match dim {
            Dim::X => self.x_cr,
            Dim::Y => self.y_cr,
            Dim::Z => self.z_cr,
            Dim::W => self.w_cr,
        }
    }

    /// Set both the counter and its carry shadow.
    pub fn set(&mut self, dim: Dim, value: u32) {
        let value = value & dim.mask();
        let (counter, carry) = self.slots(dim);
        *counter = value;
        *carry = value;
    }

    pub fn set_value(&mut self, dim: Dim, value: u32) {
        *self.slots(dim).0 = value & dim.mask();
    }

    pub fn set_cr(&mut self, dim: Dim, value: u32) {
        *self.slots(dim).1 = value & dim.mask();
    }

    /// Increment the counter only.
    pub fn add(&mut self, dim: Dim, inc: u32) {
        let (counter, _) = self.slots(dim);
        *counter = counter.wrapping_add(inc) & dim.mask();
    }

    /// Increment the carry shadow and copy it into the counter.
    pub fn add_cr(&mut self, dim: Dim, inc: u32) {
        let (counter, carry) = self.slots(dim);
        *carry = carry.wrapping_add(inc) & dim.mask();
        *counter = *carry;
    }

    /// Clear both the counter and its carry shadow.
    pub fn clear(&mut self, dim: Dim) {
        self.set(dim, 0);
    }
}

/// The two channels addressed by one unpacker or by the packers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdcGroup {
    pub channels: [AdcChannel; 2],
}

/// Index of an ADC group inside [`AdcThread`]: unpacker 0, unpacker 1, packers.
pub const ADC_GROUPS: usize = 3;

/// ADC bank of one thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdcThread {
    pub unpackers: [AdcGroup; 2],
    pub packers: AdcGroup,
}

impl AdcThread {
    /// Group by selector (0 and 1 are the unpackers, 2 the packers).
    pub fn group_mut(&mut self, sel: usize) -> Option<&mut AdcGroup> {
        match sel {
            0 | 1 => Some(&mut self.unpackers[sel]),
            2 => Some(&mut self.packers),
            _ => None,
        }
    }

    pub fn group(&self, sel: usize) -> Option<&AdcGroup> {
        match sel {
            0 | 1 => Some(&self.unpackers[sel]),
            2 => Some(&self.packers),
            _ => None,
        }
    }

    /// Apply `f` to every group whose bit is set in a 3-bit `CntSetMask`.
    pub fn for_each_selected(&mut self, cnt_set_mask: u32, mut f: impl FnMut(&mut AdcGroup)) {
        for sel in crate::bits::set_bits(cnt_set_mask, ADC_GROUPS as u32) {
            if let Some(group) = self.group_mut(sel) {
                f(group);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schemas;

    fn store() -> ConfigStore {
        ConfigStore::new(Schemas::builtin().unwrap().config)
    }

    #[test]
    fn test_addr_mod_increments() {
        let mut cfg = store();
        cfg.set_thread_value(0, "ADDR_MOD_AB_SEC1_SrcAIncr", 16).unwrap();
        cfg.set_thread_value(0, "ADDR_MOD_AB_SEC1_SrcBIncr", 8).unwrap();
        cfg.set_thread_value(0, "ADDR_MOD_DST_SEC1_DestIncr", 32).unwrap();
        cfg.set_thread_value(0, "ADDR_MOD_DST_SEC1_FidelityIncr", 1).unwrap();

        let mut rwc = Rwc::default();
        rwc.apply_addr_mod(&cfg, 0, 1, true).unwrap();
        rwc.apply_addr_mod(&cfg, 0, 1, true).unwrap();
        assert_eq!(rwc.src_a, 32);
        assert_eq!(rwc.src_b, 16);
        assert_eq!(rwc.dst, 64);
        assert_eq!(rwc.fidelity_phase, 2);
        assert_eq!(rwc.src_a_cr, 0);

        // Src counters are six bits wide
        rwc.apply_addr_mod(&cfg, 0, 1, false).unwrap();
        rwc.apply_addr_mod(&cfg, 0, 1, false).unwrap();
        assert_eq!(rwc.src_a, 0);
        assert_eq!(rwc.fidelity_phase, 2);
    }

    #[test]
    fn test_addr_mod_carry_and_clear() {
        let mut cfg = store();
        cfg.set_thread_value(1, "ADDR_MOD_AB_SEC2_SrcAIncr", 4).unwrap();
        cfg.set_thread_value(1, "ADDR_MOD_AB_SEC2_SrcACR", 1).unwrap();
        cfg.set_thread_value(1, "ADDR_MOD_AB_SEC2_SrcBClear", 1).unwrap();
        cfg.set_thread_value(1, "ADDR_MOD_DST_SEC2_DestIncr", 2).unwrap();
        cfg.set_thread_value(1, "ADDR_MOD_DST_SEC2_DestCToCR", 1).unwrap();
        cfg.set_thread_value(1, "ADDR_MOD_DST_SEC2_FidelityClear", 1).unwrap();

        let mut rwc = Rwc {
            src_a: 30,
            src_a_cr: 8,
            src_b: 5,
            src_b_cr: 5,
            dst: 10,
            dst_cr: 0,
            fidelity_phase: 3,
            extra_addr_mod: false,
        };
        rwc.apply_addr_mod(&cfg, 1, 2, true).unwrap();
        assert_eq!((rwc.src_a, rwc.src_a_cr), (12, 12));
        assert_eq!((rwc.src_b, rwc.src_b_cr), (0, 0));
        assert_eq!((rwc.dst, rwc.dst_cr), (12, 12));
        assert_eq!(rwc.fidelity_phase, 0);
    }

    #[test]
    fn test_addr_mod_upper_slots() {
        let mut cfg = store();
        cfg.set_thread_value(0, "ADDR_MOD_DST_SEC5_DestIncr", 1).unwrap();
        cfg.set_thread_value(0, "ADDR_MOD_DST_SEC1_DestIncr", 100).unwrap();

        let mut rwc = Rwc::default();
        rwc.apply_addr_mod(&cfg, 0, 5, true).unwrap();
        assert_eq!(rwc.dst, 1);
        assert!(rwc.extra_addr_mod);

        cfg.set_thread_value(0, "ADDR_MOD_SET_Base", 1).unwrap();
        rwc.apply_addr_mod(&cfg, 0, 1, true).unwrap();
        assert_eq!(rwc.dst, 2);
        assert!(!rwc.extra_addr_mod);
    }

    #[test]
    fn test_adc_channel_ops() {
        let mut ch = AdcChannel::default();
        ch.set(Dim::Y, 7);
        assert_eq!((ch.y, ch.y_cr), (7, 7));
        ch.add(Dim::Y, 3);
        assert_eq!((ch.y, ch.y_cr), (10, 7));
        ch.add_cr(Dim::Y, 1);
        assert_eq!((ch.y, ch.y_cr), (8, 8));
        ch.set(Dim::Z, 0x1FF);
        assert_eq!(ch.z, 0xFF);
        ch.add(Dim::Z, 1);
        assert_eq!(ch.z, 0);
        ch.clear(Dim::Y);
        assert_eq!(ch.get(Dim::Y), 0);
        assert_eq!(ch.get_cr(Dim::Y), 0);
    }

    #[test]
    fn test_group_selection() {
        let mut adc = AdcThread::default();
        adc.for_each_selected(0b101, |g| g.channels[1].set(Dim::X, 9));
        assert_eq!(adc.unpackers[0].channels[1].x, 9);
        assert_eq!(adc.unpackers[1].channels[1].x, 0);
        assert_eq!(adc.packers.channels[1].x, 9);
        assert!(adc.group(3).is_none());
    }
}
