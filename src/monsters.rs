use crate::constants::{
    EXPERIENCE_SCALE_PER_LEVEL, GROUP_SIZE_LEVEL_THRESHOLD, STAT_SCALE_PER_LEVEL,
};
use crate::errors::StoreError;
use crate::rng::Rng;
use crate::store::FloorRepository;
use crate::types::{Floor, MonsterDef, MonsterInstance, MonsterPoolEntry, Node, NodeKind};

#[derive(Clone, Copy, Debug)]
pub struct MonsterRosterOptions {
    pub group_size_level_threshold: u32,
    pub stat_scale_per_level: f64,
    pub experience_scale_per_level: f64,
}

impl Default for MonsterRosterOptions {
    fn default() -> Self {
        Self {
            group_size_level_threshold: GROUP_SIZE_LEVEL_THRESHOLD,
            stat_scale_per_level: STAT_SCALE_PER_LEVEL,
            experience_scale_per_level: EXPERIENCE_SCALE_PER_LEVEL,
        }
    }
}

/// Weighted random monster selection and level scaling over a floor's pool.
/// All draws go through the injected [`Rng`] so fixed seeds give exact
/// outcomes.
pub struct MonsterRosterGenerator {
    options: MonsterRosterOptions,
}

impl MonsterRosterGenerator {
    pub fn new(options: MonsterRosterOptions) -> Self {
        Self { options }
    }

    /// Spawns the roster for a combat-eligible node. Boss nodes spawn exactly
    /// one monster; other nodes roll a group size biased toward small groups
    /// below the level threshold. Returns an empty roster when the floor pool
    /// has nothing to offer.
    pub fn spawn(
        &self,
        node: &Node,
        floor: &Floor,
        repo: &dyn FloorRepository,
        participant_level: u32,
        rng: &mut Rng,
    ) -> Result<Vec<MonsterInstance>, StoreError> {
        if let NodeKind::Boss { monster, .. } = &node.kind {
            if let Some(monster_id) = monster {
                let def = repo.monster(monster_id)?;
                return Ok(vec![self.scale(&def, participant_level)]);
            }
            return Ok(self
                .draw(&floor.monster_pool, repo, participant_level, rng)?
                .into_iter()
                .collect());
        }

        let count = self.roll_group_size(participant_level, rng);
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            match self.draw(&floor.monster_pool, repo, participant_level, rng)? {
                Some(instance) => out.push(instance),
                None => break,
            }
        }
        Ok(out)
    }

    fn roll_group_size(&self, participant_level: u32, rng: &mut Rng) -> usize {
        if participant_level >= self.options.group_size_level_threshold {
            return rng.int(1, 5) as usize;
        }
        let roll = rng.next_f32();
        if roll < 0.5 {
            rng.int(1, 2) as usize
        } else if roll < 0.85 {
            3
        } else {
            rng.int(4, 5) as usize
        }
    }

    fn draw(
        &self,
        pool: &[MonsterPoolEntry],
        repo: &dyn FloorRepository,
        participant_level: u32,
        rng: &mut Rng,
    ) -> Result<Option<MonsterInstance>, StoreError> {
        if pool.is_empty() {
            return Ok(None);
        }
        let qualified: Vec<&MonsterPoolEntry> = pool
            .iter()
            .filter(|entry| entry_matches_level(entry, participant_level))
            .collect();
        let candidates: Vec<&MonsterPoolEntry> = if qualified.is_empty() {
            pool.iter().collect()
        } else {
            qualified
        };

        let weights: Vec<u32> = candidates.iter().map(|entry| entry.weight).collect();
        let Some(index) = rng.weighted_index(&weights) else {
            return Ok(None);
        };
        let def = repo.monster(&candidates[index].monster)?;
        Ok(Some(self.scale(&def, participant_level)))
    }

    fn scale(&self, def: &MonsterDef, target_level: u32) -> MonsterInstance {
        let delta = target_level as i64 - def.base_level as i64;
        let stat_factor = 1.0 + delta as f64 * self.options.stat_scale_per_level;
        let experience_factor = 1.0 + delta as f64 * self.options.experience_scale_per_level;
        MonsterInstance {
            monster: def.id.clone(),
            name: def.name.clone(),
            level: target_level,
            max_hp: scale_stat(def.max_hp, stat_factor),
            attack: scale_stat(def.attack, stat_factor),
            defense: scale_stat(def.defense, stat_factor),
            experience: ((def.experience as f64 * experience_factor).floor() as i32).max(0),
        }
    }
}

fn entry_matches_level(entry: &MonsterPoolEntry, level: u32) -> bool {
    if let Some(min) = entry.min_level {
        if level < min {
            return false;
        }
    }
    if let Some(max) = entry.max_level {
        if level > max {
            return false;
        }
    }
    true
}

fn scale_stat(base: i32, factor: f64) -> i32 {
    ((base as f64 * factor).floor() as i32).max(1)
}
