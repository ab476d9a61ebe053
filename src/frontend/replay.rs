//! Replay expander: the second frontend stage.
//!
//! REPLAY with `load_mode = 1` records the next `len` instructions into a
//! 32-slot circular buffer, optionally executing them as they go past.
//! REPLAY with `load_mode = 0` plays `len` recorded instructions back.
//! A `len` of zero means 64, which wraps the buffer twice.

use std::collections::VecDeque;

use crate::arch::{REPLAY_DEFAULT_LEN, REPLAY_SLOTS};
use crate::decode::Decoder;
use crate::error::Result;
use crate::schema::Opcode;

/// An in-progress recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Recording {
    start: usize,
    len: u32,
    recorded: u32,
    execute_while_loading: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayExpander {
    buffer: [u32; REPLAY_SLOTS],
    recording: Option<Recording>,
}

impl Default for ReplayExpander {
    fn default() -> Self {
        Self {
            buffer: [0; REPLAY_SLOTS],
            recording: None,
        }
    }
}

fn effective_len(len: u32) -> u32 {
    if len == 0 {
        REPLAY_DEFAULT_LEN
    } else {
        len
    }
}

impl ReplayExpander {
    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn slot(&self, index: usize) -> u32 {
        self.buffer[index % REPLAY_SLOTS]
    }

    /// Handle one instruction word, pushing whatever it produces onto `out`.
    pub fn process(&mut self, word: u32, decoder: &Decoder, out: &mut VecDeque<u32>) -> Result<()> {
        if let Some(rec) = self.recording.as_mut() {
            if rec.recorded < rec.len {
                self.buffer[(rec.start + rec.recorded as usize) % REPLAY_SLOTS] = word;
                rec.recorded += 1;
                if rec.execute_while_loading {
                    out.push_back(word);
                }
                return Ok(());
            }
            // The recording is complete; this word is handled normally.
            self.recording = None;
        }

        let inst = decoder.decode(word)?;
        if inst.opcode() != Opcode::Replay {
            out.push_back(word);
            return Ok(());
        }

        let start = inst.arg("start_idx")? as usize;
        let len = effective_len(inst.arg("len")?);
        if inst.arg("load_mode")? == 0 {
            log::trace!("Replaying {} instructions from slot {}", len, start);
            out.extend((0..len as usize).map(|i| self.buffer[(start + i) % REPLAY_SLOTS]));
        } else {
            log::trace!("Recording {} instructions into slot {}", len, start);
            self.recording = Some(Recording {
                start,
                len,
                recorded: 0,
                execute_while_loading: inst.arg("execute_while_loading")? != 0,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schemas;

    fn decoder() -> Decoder {
        Decoder::new(Schemas::builtin().unwrap().instructions)
    }

    fn replay(d: &Decoder, load: u32, exec: u32, len: u32, start: u32) -> u32 {
        d.schema()
            .encode(
                "REPLAY",
                &[
                    ("load_mode", load),
                    ("execute_while_loading", exec),
                    ("len", len),
                    ("start_idx", start),
                ],
            )
            .unwrap()
    }

    fn feed(r: &mut ReplayExpander, d: &Decoder, words: &[u32]) -> Vec<u32> {
        let mut out = VecDeque::new();
        for &w in words {
            r.process(w, d, &mut out).unwrap();
        }
        out.into_iter().collect()
    }

    #[test]
    fn test_load_then_play_round_trip() {
        let d = decoder();
        let mut r = ReplayExpander::default();
        let body: Vec<u32> = (0..5).map(|i| 0x7100_0000 | i).collect();

        let mut words = vec![replay(&d, 1, 0, 5, 30)];
        words.extend(&body);
        assert!(feed(&mut r, &d, &words).is_empty());
        assert!(r.is_recording());
        assert_eq!(r.slot(30), body[0]);
        assert_eq!(r.slot(2), body[4]);

        // The next REPLAY closes the recording and plays it back.
        let out = feed(&mut r, &d, &[replay(&d, 0, 0, 5, 30)]);
        assert_eq!(out, body);
        assert!(!r.is_recording());
    }

    #[test]
    fn test_execute_while_loading_forwards() {
        let d = decoder();
        let mut r = ReplayExpander::default();
        let out = feed(&mut r, &d, &[replay(&d, 1, 1, 2, 0), 0x7100_0001, 0x7100_0002, 0x6000_0000]);
        assert_eq!(out, vec![0x7100_0001, 0x7100_0002, 0x6000_0000]);
        assert_eq!(r.slot(0), 0x7100_0001);
        assert_eq!(r.slot(1), 0x7100_0002);
    }

    #[test]
    fn test_zero_len_plays_64() {
        let d = decoder();
        let mut r = ReplayExpander::default();
        let mut words = vec![replay(&d, 1, 0, 32, 0)];
        words.extend((0..32).map(|i| 0x7100_0000 | i));
        feed(&mut r, &d, &words);

        let mut out = VecDeque::new();
        r.process(replay(&d, 0, 0, 0, 4), &d, &mut out).unwrap();
        assert_eq!(out.len(), 64);
        assert_eq!(out[0], 0x7100_0004);
        assert_eq!(out[28], 0x7100_0000);
        assert_eq!(out[32], 0x7100_0004);
    }

    #[test]
    fn test_passthrough_and_unknown_opcode() {
        let d = decoder();
        let mut r = ReplayExpander::default();
        assert_eq!(feed(&mut r, &d, &[0x6000_0000]), vec![0x6000_0000]);

        let mut out = VecDeque::new();
        assert!(r.process(0xFF00_0000, &d, &mut out).is_err());
    }
}
