//! Miscellaneous unit: ADC (address counter) setup for the packers and
//! unpackers.
//!
//! Every instruction names its target groups with `CntSetMask` (bit 0
//! unpacker 0, bit 1 unpacker 1, bit 2 packers). Most can also redirect the
//! write to another thread: an override of zero means the issuing thread,
//! otherwise the thread is `override - 1`.

use crate::bits::{get_bits, nth_bit};
use crate::decode::Instruction;
use crate::error::{Result, SimError};
use crate::schema::Opcode;
use crate::state::{AdcGroup, Dim};

use super::unit::{unhandled, BackendUnit, InflightView, Pending, PendingQueue, UnitStats};
use super::Shared;

#[derive(Debug, Default)]
pub struct MiscUnit {
    pending: PendingQueue,
    stats: UnitStats,
}

/// How a four-field ADC instruction updates each enabled counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Update {
    /// Counter and carry shadow take the value
    Set,
    /// Counter advances by the value
    Increment,
}

/// Operands of the XY/ZW instruction family.
struct Quad {
    /// (channel, dimension, operand, enable bit)
    slots: [(usize, Dim, u32, u32); 4],
    enables: u32,
    thread: usize,
}

fn resolve_thread(issuer: usize, override_field: u32) -> usize {
    match override_field {
        0 => issuer,
        n => (n - 1) as usize,
    }
}

fn decode_quad(inst: &Instruction, thread: usize, dims: (Dim, Dim), has_enables: bool) -> Result<Quad> {
    let ch1_y = inst.arg("Ch1_Y")?;
    let (first, second) = dims;
    Ok(Quad {
        slots: [
            (0, first, inst.arg("Ch0_X")?, 0),
            (0, second, inst.arg("Ch0_Y")?, 1),
            (1, first, inst.arg("Ch1_X")?, 2),
            (1, second, get_bits(ch1_y, 0, 2), 3),
        ],
        enables: if has_enables { inst.arg("BitMask")? } else { 0xF },
        thread: resolve_thread(thread, get_bits(ch1_y, 3, 4)),
    })
}

fn apply_quad(group: &mut AdcGroup, quad: &Quad, update: Update) {
    for &(channel, dim, operand, bit) in quad.slots.iter() {
        if !nth_bit(quad.enables, bit) {
            continue;
        }
        let channel = &mut group.channels[channel];
        match update {
            Update::Set => channel.set(dim, operand),
            Update::Increment => channel.add(dim, operand),
        }
    }
}

impl MiscUnit {
    fn execute(&self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        let xy = (Dim::X, Dim::Y);
        let zw = (Dim::Z, Dim::W);
        let (dims, update, has_enables) = match inst.opcode() {
            Opcode::DmaNop => return Ok(()),
            Opcode::SetAdc => return self.set_adc(shared, inst, thread),
            Opcode::SetAdcXx => {
                let x0 = inst.arg("x_start")?;
                let x1 = inst.arg("x_end2")?;
                shared.adc[thread].for_each_selected(inst.arg("CntSetMask")?, |group| {
                    group.channels[0].set(Dim::X, x0);
                    group.channels[1].set(Dim::X, x1);
                });
                return Ok(());
            }
            Opcode::SetAdcXy => (xy, Update::Set, true),
            Opcode::SetAdcZw => (zw, Update::Set, true),
            Opcode::IncAdcXy => (xy, Update::Increment, false),
            Opcode::IncAdcZw => (zw, Update::Increment, false),
            Opcode::AddrCrXy => (xy, Update::Set, true),
            Opcode::AddrCrZw => (zw, Update::Set, true),
            _ => return Err(unhandled(inst, self.name())),
        };

        let quad = decode_quad(inst, thread, dims, has_enables)?;
        let target = shared
            .adc
            .get_mut(quad.thread)
            .ok_or(SimError::InvalidThread(quad.thread))?;
        target.for_each_selected(inst.arg("CntSetMask")?, |group| apply_quad(group, &quad, update));
        if shared.diagnostics.packing {
            log::info!("{} updated ADCs of thread {}", inst, quad.thread);
        }
        Ok(())
    }

    fn set_adc(&self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        let raw = inst.arg("Value")?;
        let target = resolve_thread(thread, raw >> 16);
        let value = raw & 0xFFFF;
        let dim = Dim::from_index(inst.arg("DimensionIndex")?);
        let channel = inst.arg("ChannelIndex")? as usize & 1;
        let adc = shared
            .adc
            .get_mut(target)
            .ok_or(SimError::InvalidThread(target))?;
        adc.for_each_selected(inst.arg("CntSetMask")?, |group| {
            group.channels[channel].set(dim, value);
        });
        Ok(())
    }
}

impl BackendUnit for MiscUnit {
    fn name(&self) -> &'static str {
        "misc"
    }

    fn admit(&mut self, inst: Instruction, thread: usize) -> Result<bool> {
        let accepted = self.pending.admit_one_per_thread(inst, thread);
        self.stats.record_offer(accepted);
        Ok(accepted)
    }

    fn drain(&mut self, shared: &mut Shared, _view: &InflightView) -> Result<()> {
        for Pending { inst, thread } in self.pending.take() {
            self.execute(shared, &inst, thread)?;
            self.stats.executed += 1;
        }
        Ok(())
    }

    fn has_inflight_from(&self, thread: usize) -> bool {
        self.pending.has_thread(thread)
    }

    fn stats(&self) -> &UnitStats {
        &self.stats
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_one_per_thread() {
        let mut be = backend();
        assert!(issue(&mut be, 0, "DMANOP", &[]));
        assert!(!issue(&mut be, 0, "DMANOP", &[]));
        assert!(issue(&mut be, 1, "DMANOP", &[]));
        be.tick().unwrap();
        assert!(issue(&mut be, 0, "DMANOP", &[]));
    }

    #[test]
    fn test_setadcxy_enables_and_groups() {
        let mut be = backend();
        assert!(issue(
            &mut be,
            0,
            "SETADCXY",
            &[("BitMask", 0b1001), ("Ch0_X", 5), ("Ch0_Y", 6), ("Ch1_X", 7), ("Ch1_Y", 3), ("CntSetMask", 0b101)]
        ));
        be.tick().unwrap();
        let adc = be.shared().adc[0];
        for group in [adc.unpackers[0], adc.packers] {
            assert_eq!((group.channels[0].x, group.channels[0].x_cr), (5, 5));
            assert_eq!(group.channels[0].y, 0);
            assert_eq!(group.channels[1].x, 0);
            assert_eq!((group.channels[1].y, group.channels[1].y_cr), (3, 3));
        }
        assert_eq!(adc.unpackers[1], AdcGroup::default());
    }

    #[test]
    fn test_setadczw_writes_z_and_w() {
        let mut be = backend();
        assert!(issue(
            &mut be,
            0,
            "SETADCZW",
            &[("BitMask", 0b0011), ("Ch0_X", 2), ("Ch0_Y", 4), ("CntSetMask", 0b010)]
        ));
        be.tick().unwrap();
        let channel = be.shared().adc[0].unpackers[1].channels[0];
        assert_eq!((channel.z, channel.z_cr, channel.w, channel.w_cr), (2, 2, 4, 4));
    }

    #[test]
    fn test_thread_override_and_increment() {
        let mut be = backend();
        // Override 3 targets thread 2; Ch1_Y bits 0-2 carry the increment
        let ch1_y = (3 << 3) | 2;
        for _ in 0..2 {
            assert!(issue(&mut be, 0, "INCADCXY", &[("Ch0_X", 1), ("Ch1_Y", ch1_y), ("CntSetMask", 0b001)]));
            be.tick().unwrap();
        }
        let group = be.shared().adc[2].unpackers[0];
        assert_eq!(group.channels[0].x, 2);
        assert_eq!(group.channels[1].y, 4);
        assert_eq!(group.channels[0].x_cr, 0);
        assert_eq!(be.shared().adc[0], Default::default());
    }

    #[test]
    fn test_addrcr_sets_counter_and_carry() {
        let mut be = backend();
        for _ in 0..2 {
            assert!(issue(&mut be, 1, "ADDRCRZW", &[("BitMask", 0b0100), ("Ch1_X", 3), ("CntSetMask", 0b100)]));
            be.tick().unwrap();
        }
        let channel = be.shared().adc[1].packers.channels[1];
        assert_eq!((channel.z, channel.z_cr), (3, 3));
        assert_eq!(channel.w, 0);

        assert!(issue(&mut be, 0, "ADDRCRXY", &[("BitMask", 0b0001), ("Ch0_X", 7), ("CntSetMask", 0b001)]));
        be.tick().unwrap();
        assert!(issue(&mut be, 0, "ADDRCRXY", &[("BitMask", 0b0001), ("Ch0_X", 2), ("CntSetMask", 0b001)]));
        be.tick().unwrap();
        let channel = be.shared().adc[0].unpackers[0].channels[0];
        assert_eq!((channel.x, channel.x_cr), (2, 2));
    }

    #[test]
    fn test_setadc_and_setadcxx() {
        let mut be = backend();
        // Value bits 16-17 select thread 1 (override 2)
        assert!(issue(
            &mut be,
            0,
            "SETADC",
            &[("Value", (2 << 16) | 0x1234), ("DimensionIndex", 1), ("ChannelIndex", 1), ("CntSetMask", 0b010)]
        ));
        assert!(issue(&mut be, 2, "SETADCXX", &[("x_start", 10), ("x_end2", 20), ("CntSetMask", 0b100)]));
        be.tick().unwrap();
        let channel = be.shared().adc[1].unpackers[1].channels[1];
        assert_eq!((channel.y, channel.y_cr), (0x1234, 0x1234));
        let packers = be.shared().adc[2].packers;
        assert_eq!(packers.channels[0].x_cr, 10);
        assert_eq!(packers.channels[1].x, 20);
    }
}
