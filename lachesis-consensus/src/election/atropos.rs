//! Atropos election by virtual voting
//!
//! Roots of frame `frame_to_decide + 1` vote directly on every validator
//! slot of `frame_to_decide`; roots of later frames aggregate the votes of
//! the previous frame's roots they forkless-cause. A slot is decided once
//! either side reaches the quorum of the voting frame. Slots are ranked by
//! stake, then by validator id; the frame is decided at the first
//! yes-decided slot whose higher-ranked slots are all decided.

use super::root::{forkless_cause, RootSets};
use crate::store::EventStore;
use crate::validators::ValidatorLedger;
use lachesis_core::{EventId, Frame, ValidatorId, Weight};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A root's vote on one validator slot of the frame being decided
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionVote {
    pub decided: bool,
    pub yes: bool,
    /// The candidate root the vote refers to
    pub observed_root: Option<EventId>,
}

/// Votes cast in one frame's election: voting root -> candidate validator -> vote
pub type VoteTable = BTreeMap<EventId, BTreeMap<ValidatorId, ElectionVote>>;

/// A finalized frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtroposDecision {
    pub frame: Frame,
    pub atropos: EventId,
    /// Block number after this decision
    pub block: u64,
}

#[derive(Debug, Clone)]
struct SlotDecision {
    yes: bool,
    root: Option<EventId>,
}

/// Where the ranked slots of a frame stand
#[derive(Debug, Clone, PartialEq, Eq)]
enum FrameOutcome {
    /// A higher-ranked slot is still open
    Undecided,
    Atropos(EventId),
    /// Every slot decided no
    Rejected,
}

/// Election state for consecutive frames
#[derive(Debug, Clone)]
pub struct Election {
    frame_to_decide: Frame,
    block: u64,
    votes: BTreeMap<Frame, VoteTable>,
    decided: BTreeMap<ValidatorId, SlotDecision>,
    atropos: BTreeMap<Frame, EventId>,
}

impl Default for Election {
    fn default() -> Self {
        Self::new()
    }
}

impl Election {
    /// Start deciding frame 1 at block 1
    pub fn new() -> Self {
        Self {
            frame_to_decide: 1,
            block: 1,
            votes: BTreeMap::new(),
            decided: BTreeMap::new(),
            atropos: BTreeMap::new(),
        }
    }

    pub fn frame_to_decide(&self) -> Frame {
        self.frame_to_decide
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    /// Atropos roots by decided frame
    pub fn atropos_roots(&self) -> &BTreeMap<Frame, EventId> {
        &self.atropos
    }

    pub fn atropos(&self, frame: Frame) -> Option<&EventId> {
        self.atropos.get(&frame)
    }

    /// Vote tables by election frame
    pub fn votes(&self) -> &BTreeMap<Frame, VoteTable> {
        &self.votes
    }

    pub fn vote(&self, voter: &EventId, candidate: &ValidatorId) -> Option<&ElectionVote> {
        self.votes
            .get(&self.frame_to_decide)
            .and_then(|table| table.get(voter))
            .and_then(|votes| votes.get(candidate))
    }

    /// Whether a slot of the current election is decided
    pub fn is_decided(&self, candidate: &ValidatorId) -> bool {
        self.decided.contains_key(candidate)
    }

    /// Drop a cheater's slot from the running election
    pub fn drop_validator(&mut self, validator: &ValidatorId) {
        self.decided.remove(validator);
    }

    /// Record every missing vote of roots above `frame_to_decide` and decide
    /// as many consecutive frames as the DAG allows
    pub fn sweep(
        &mut self,
        store: &mut EventStore,
        ledger: &mut ValidatorLedger,
        roots: &RootSets,
        frame: Frame,
    ) -> Vec<AtroposDecision> {
        let mut decisions = Vec::new();

        while self.frame_to_decide < frame {
            let slots = ledger.participants(self.frame_to_decide);
            if slots.is_empty() {
                break;
            }

            for round in self.frame_to_decide + 1..=frame {
                for (_, voter) in roots.roots(round) {
                    for slot in &slots {
                        self.cast(store, ledger, roots, round, &voter, slot);
                    }
                }
            }

            match self.outcome(ledger, &slots) {
                FrameOutcome::Undecided => break,
                FrameOutcome::Atropos(atropos) => {
                    if let Some(event) = store.get_mut(&atropos) {
                        event.mark_atropos();
                    }
                    let decided_frame = self.frame_to_decide;
                    self.atropos.insert(decided_frame, atropos.clone());
                    self.frame_to_decide += 1;
                    self.block += 1;
                    self.decided.clear();
                    info!(
                        "Frame {} decided, atropos {} (block {})",
                        decided_frame, atropos, self.block
                    );
                    decisions.push(AtroposDecision {
                        frame: decided_frame,
                        atropos,
                        block: self.block,
                    });
                }
                FrameOutcome::Rejected => {
                    debug!(
                        "Every slot of frame {} decided no",
                        self.frame_to_decide
                    );
                    break;
                }
            }
        }

        decisions
    }

    fn cast(
        &mut self,
        store: &EventStore,
        ledger: &mut ValidatorLedger,
        roots: &RootSets,
        round: Frame,
        voter: &EventId,
        candidate: &ValidatorId,
    ) {
        if self.decided.contains_key(candidate) || self.vote(voter, candidate).is_some() {
            return;
        }
        let Some(voter_event) = store.get(voter) else {
            return;
        };

        let vote = if round == self.frame_to_decide + 1 {
            let observed = roots
                .root_of(self.frame_to_decide, candidate)
                .and_then(|root| store.get(root))
                .filter(|root| forkless_cause(voter_event, root, ledger));
            ElectionVote {
                decided: false,
                yes: observed.is_some(),
                observed_root: observed.map(|root| root.id().clone()),
            }
        } else {
            let mut yes: Weight = 0;
            let mut no: Weight = 0;
            let mut observed: Option<EventId> = None;

            for (previous_creator, previous) in roots.roots(round - 1) {
                let Some(previous_event) = store.get(&previous) else {
                    continue;
                };
                if !forkless_cause(voter_event, previous_event, ledger) {
                    continue;
                }
                let weight = ledger.weight(&previous_creator);
                match self.vote(&previous, candidate) {
                    Some(v) if v.yes => {
                        yes += weight;
                        if let Some(root) = &v.observed_root {
                            if observed.as_ref().map_or(true, |o| root < o) {
                                observed = Some(root.clone());
                            }
                        }
                    }
                    _ => no += weight,
                }
            }

            let quorum = ledger.quorum(round);
            let supported = yes > 0 && yes >= no;
            ElectionVote {
                decided: yes >= quorum || no >= quorum,
                yes: supported,
                observed_root: if supported { observed } else { None },
            }
        };

        if vote.decided {
            debug!(
                "Slot {} of frame {} decided {} by {}",
                candidate,
                self.frame_to_decide,
                if vote.yes { "yes" } else { "no" },
                voter
            );
            self.decided.insert(
                candidate.clone(),
                SlotDecision {
                    yes: vote.yes,
                    root: vote.observed_root.clone(),
                },
            );
        }

        self.votes
            .entry(self.frame_to_decide)
            .or_default()
            .entry(voter.clone())
            .or_default()
            .insert(candidate.clone(), vote);
    }

    /// Slots by descending stake, then by ascending validator id
    fn ranked<'a>(ledger: &ValidatorLedger, slots: &'a [ValidatorId]) -> Vec<&'a ValidatorId> {
        let mut ranked: Vec<&ValidatorId> = slots.iter().collect();
        ranked.sort_by_key(|slot| (Reverse(ledger.weight(slot)), *slot));
        ranked
    }

    /// Walk the ranked slots: stop at the first open slot, or take the
    /// first one decided yes
    fn outcome(&self, ledger: &ValidatorLedger, slots: &[ValidatorId]) -> FrameOutcome {
        for slot in Self::ranked(ledger, slots) {
            match self.decided.get(slot) {
                None => return FrameOutcome::Undecided,
                Some(SlotDecision {
                    yes: true,
                    root: Some(root),
                }) => return FrameOutcome::Atropos(root.clone()),
                Some(_) => continue,
            }
        }
        FrameOutcome::Rejected
    }
}
