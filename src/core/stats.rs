use crate::core::domain::EventType;
use std::fmt;

/// Running event statistics of a simulator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepCounters {
    pub steps: u64,
    pub single_escape: u64,
    pub single_reaction: u64,
    pub pair_single_reaction: u64,
    pub pair_iv_reaction: u64,
    pub pair_iv_escape: u64,
    pub pair_com_escape: u64,
    /// Every Brownian step of every Multi.
    pub multi_steps: u64,
    pub multi_escape: u64,
    pub multi_unimolecular_reaction: u64,
    pub multi_bimolecular_reaction: u64,
    pub reaction_events: u64,
    /// Reactions whose products could not be placed.
    pub rejected_moves: u64,
    pub zero_steps: u64,
}

impl StepCounters {
    pub fn record_single(&mut self, event: EventType) {
        match event {
            EventType::SingleReaction => self.single_reaction += 1,
            _ => self.single_escape += 1,
        }
    }

    pub fn record_pair(&mut self, event: EventType) {
        match event {
            EventType::SingleReaction => self.pair_single_reaction += 1,
            EventType::IvReaction => self.pair_iv_reaction += 1,
            EventType::IvEscape => self.pair_iv_escape += 1,
            _ => self.pair_com_escape += 1,
        }
    }

    pub fn record_multi(&mut self, event: EventType) {
        match event {
            EventType::MultiUnimolecularReaction => self.multi_unimolecular_reaction += 1,
            EventType::MultiBimolecularReaction => self.multi_bimolecular_reaction += 1,
            _ => self.multi_escape += 1,
        }
    }

    pub fn single_total(&self) -> u64 {
        self.single_escape + self.single_reaction
    }

    pub fn pair_total(&self) -> u64 {
        self.pair_single_reaction + self.pair_iv_reaction + self.pair_iv_escape + self.pair_com_escape
    }

    /// Name/value view used by drivers that want a flat record.
    pub fn entries(&self) -> [(&'static str, u64); 14] {
        [
            ("steps", self.steps),
            ("single_escape", self.single_escape),
            ("single_reaction", self.single_reaction),
            ("pair_single_reaction", self.pair_single_reaction),
            ("pair_iv_reaction", self.pair_iv_reaction),
            ("pair_iv_escape", self.pair_iv_escape),
            ("pair_com_escape", self.pair_com_escape),
            ("multi_steps", self.multi_steps),
            ("multi_escape", self.multi_escape),
            ("multi_unimolecular_reaction", self.multi_unimolecular_reaction),
            ("multi_bimolecular_reaction", self.multi_bimolecular_reaction),
            ("reaction_events", self.reaction_events),
            ("rejected_moves", self.rejected_moves),
            ("zero_steps", self.zero_steps),
        ]
    }
}

impl fmt::Display for StepCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "steps = {}", self.steps)?;
        writeln!(
            f,
            "\tSingle:\t{}\t(escape: {}, reaction: {})",
            self.single_total(),
            self.single_escape,
            self.single_reaction
        )?;
        writeln!(
            f,
            "\tPair:\t{}\t(escape r: {}, R: {}, reaction pair: {}, single: {})",
            self.pair_total(),
            self.pair_iv_escape,
            self.pair_com_escape,
            self.pair_iv_reaction,
            self.pair_single_reaction
        )?;
        writeln!(
            f,
            "\tMulti:\t{}\t(escape: {}, reaction pair: {}, single: {})",
            self.multi_steps,
            self.multi_escape,
            self.multi_bimolecular_reaction,
            self.multi_unimolecular_reaction
        )?;
        writeln!(f, "total reactions = {}", self.reaction_events)?;
        write!(f, "rejected moves = {}", self.rejected_moves)
    }
}
