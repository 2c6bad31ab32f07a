use chrono::{DateTime, Utc};

use crate::errors::CoreError;
use crate::store::{RewardContext, RewardReason};
use crate::types::{ParticipantId, ParticipantStatus, PartyStatus, RuntimeEvent, SweepReport};

use super::LabyrinthEngine;

impl LabyrinthEngine {
    /// One elimination pass over every stored position. Participants whose
    /// floor defines a time limit and who joined longer ago than that limit
    /// are eliminated; winners and the already-eliminated are skipped, so
    /// repeating a pass is a no-op.
    pub fn sweep_eliminations(&mut self, now: DateTime<Utc>) -> Result<SweepReport, CoreError> {
        let positions = self.positions.all_positions()?;
        let checked = positions.len();
        let mut eliminated = Vec::new();

        for position in positions {
            let Some(entry) = self.participants.get(&position.participant) else {
                continue;
            };
            if entry.status != ParticipantStatus::Active {
                continue;
            }
            let floor_def = match self.repo.floor(&position.floor) {
                Ok(floor_def) => floor_def,
                Err(err) => {
                    log::warn!("sweep skipped {}: {err}", position.participant);
                    continue;
                }
            };
            let Some(limit) = floor_def.time_limit else {
                continue;
            };
            if now - position.joined_floor_at < limit {
                continue;
            }

            if let Some(entry) = self.participants.get_mut(&position.participant) {
                entry.status = ParticipantStatus::Eliminated;
            }
            self.positions.remove(&position.participant, &position.floor)?;
            let context = RewardContext {
                floor: position.floor.clone(),
                reason: RewardReason::TimeLimitElimination,
            };
            if let Err(err) = self.rewards.award_participation(&position.participant, &context) {
                log::warn!(
                    "participation reward failed for {}: {err}",
                    position.participant
                );
            }
            self.settle_party_status(&position.participant);
            self.events.push(RuntimeEvent::Eliminated {
                participant: position.participant.clone(),
                floor: position.floor.clone(),
                reason: "time_limit".to_string(),
            });
            eliminated.push(position.participant);
        }

        Ok(SweepReport { checked, eliminated })
    }

    fn settle_party_status(&mut self, participant: &ParticipantId) {
        let Some(party_id) = self
            .participants
            .get(participant)
            .and_then(|entry| entry.party.clone())
        else {
            return;
        };
        let Some(party) = self.parties.get(&party_id) else {
            return;
        };
        let all_out = party.members.iter().all(|member| {
            self.participants
                .get(member)
                .map(|entry| entry.status != ParticipantStatus::Active)
                .unwrap_or(true)
        });
        if all_out {
            if let Some(party) = self.parties.get_mut(&party_id) {
                party.status = PartyStatus::Eliminated;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::testutil::{harness, harness_with_time_limit, FLOOR};
    use crate::types::{FloorId, Party, PartyId};

    fn pid(name: &str) -> ParticipantId {
        ParticipantId::new(name)
    }

    fn floor() -> FloorId {
        FloorId::new(FLOOR)
    }

    #[test]
    fn participants_past_the_time_limit_are_eliminated_once() {
        let mut h = harness_with_time_limit(Duration::hours(2));
        let joined_at = Utc::now();
        h.engine
            .join_floor(&pid("p1"), &floor(), None, joined_at)
            .unwrap();

        let early = h
            .engine
            .sweep_eliminations(joined_at + Duration::hours(1))
            .unwrap();
        assert!(early.eliminated.is_empty());

        let due = h
            .engine
            .sweep_eliminations(joined_at + Duration::hours(2))
            .unwrap();
        assert_eq!(due.eliminated, vec![pid("p1")]);
        assert_eq!(
            h.engine.participant_status(&pid("p1")),
            Some(ParticipantStatus::Eliminated)
        );
        assert_eq!(h.engine.position(&pid("p1"), &floor()).unwrap(), None);
        assert_eq!(h.reward_calls(), vec![pid("p1")]);

        // Running the same pass again must not eliminate twice nor error.
        let repeat = h
            .engine
            .sweep_eliminations(joined_at + Duration::hours(2))
            .unwrap();
        assert!(repeat.eliminated.is_empty());
        assert_eq!(h.reward_calls(), vec![pid("p1")]);
    }

    #[test]
    fn sweep_emits_elimination_events() {
        let mut h = harness_with_time_limit(Duration::minutes(30));
        let joined_at = Utc::now();
        h.engine
            .join_floor(&pid("p1"), &floor(), None, joined_at)
            .unwrap();
        h.engine.drain_events();

        h.engine
            .sweep_eliminations(joined_at + Duration::hours(1))
            .unwrap();
        let events = h.engine.drain_events();
        assert!(events.iter().any(|event| matches!(
            event,
            RuntimeEvent::Eliminated { participant, reason, .. }
                if participant == &pid("p1") && reason == "time_limit"
        )));
    }

    #[test]
    fn winners_are_not_swept() {
        let mut h = harness_with_time_limit(Duration::hours(2));
        let joined_at = Utc::now();
        h.engine
            .join_floor(&pid("p1"), &floor(), None, joined_at)
            .unwrap();
        assert!(h.engine.mark_winner(&pid("p1")));

        let report = h
            .engine
            .sweep_eliminations(joined_at + Duration::hours(5))
            .unwrap();
        assert!(report.eliminated.is_empty());
        assert_eq!(
            h.engine.participant_status(&pid("p1")),
            Some(ParticipantStatus::Winner)
        );
    }

    #[test]
    fn floors_without_a_time_limit_never_eliminate() {
        let mut h = harness();
        let joined_at = Utc::now();
        h.engine
            .join_floor(&pid("p1"), &floor(), None, joined_at)
            .unwrap();
        let report = h
            .engine
            .sweep_eliminations(joined_at + Duration::hours(100))
            .unwrap();
        assert_eq!(report.checked, 1);
        assert!(report.eliminated.is_empty());
    }

    #[test]
    fn party_is_marked_eliminated_when_every_member_is_out() {
        let mut h = harness_with_time_limit(Duration::hours(1));
        let joined_at = Utc::now();
        let party_id = PartyId::new("party-1");
        h.engine.register_party(Party {
            id: party_id.clone(),
            leader: pid("p1"),
            members: vec![pid("p1"), pid("p2")],
            floor_number: 1,
            status: crate::types::PartyStatus::Active,
        });
        h.engine
            .join_floor(&pid("p1"), &floor(), Some(party_id.clone()), joined_at)
            .unwrap();
        h.engine
            .join_floor(&pid("p2"), &floor(), Some(party_id.clone()), joined_at)
            .unwrap();

        let report = h
            .engine
            .sweep_eliminations(joined_at + Duration::hours(2))
            .unwrap();
        assert_eq!(report.eliminated.len(), 2);
        assert_eq!(h.party_status(&party_id), Some(PartyStatus::Eliminated));
    }
}
