//! Per-activity reward computation.
//!
//! Formulas live here as pure functions over the task payload and the
//! configured constants; balance tuning happens in configuration, not code.
//! Randomness comes in through the caller's RNG handle so catch-up replay
//! and tests stay deterministic when they need to be.

use rand::Rng;

use crate::{
    config::RewardConfig,
    state::queue::{ActivityPayload, Reward},
};

/// Experience granted per second of activity, before bonuses.
const BASE_XP_PER_SECOND: u64 = 2;
/// Resource units granted per completed harvesting cycle.
const HARVEST_YIELD: u32 = 1;
/// Currency granted per enemy level on a combat kill.
const CURRENCY_PER_ENEMY_LEVEL: u64 = 10;

/// Compute the rewards for one completed cycle of a task.
pub fn for_completed_cycle(
    payload: &ActivityPayload,
    duration_ms: u64,
    config: &RewardConfig,
    rng: &mut impl Rng,
) -> Vec<Reward> {
    match payload {
        ActivityPayload::Harvesting {
            resource_id,
            skill,
            skill_level,
        } => {
            let mut rewards = vec![
                Reward::Experience {
                    skill: skill.clone(),
                    amount: harvesting_experience(duration_ms, *skill_level, config),
                },
                Reward::Resource {
                    resource_id: resource_id.clone(),
                    quantity: HARVEST_YIELD,
                },
            ];
            if rng.random::<f64>() < config.exotic_drop_chance {
                rewards.push(Reward::Item {
                    item_id: format!("exotic_{resource_id}"),
                    quantity: 1,
                });
            }
            rewards
        }
        ActivityPayload::Crafting {
            output_item_id,
            output_quantity,
            ..
        } => vec![
            Reward::Experience {
                skill: "crafting".into(),
                amount: base_experience(duration_ms),
            },
            Reward::Item {
                item_id: output_item_id.clone(),
                quantity: *output_quantity,
            },
        ],
        ActivityPayload::Combat {
            enemy_id,
            enemy_level,
        } => {
            let mut rewards = vec![
                Reward::Experience {
                    skill: "combat".into(),
                    amount: base_experience(duration_ms),
                },
                Reward::Currency {
                    amount: u64::from(*enemy_level) * CURRENCY_PER_ENEMY_LEVEL,
                },
            ];
            if rng.random::<f64>() < config.combat_loot_chance {
                rewards.push(Reward::Item {
                    item_id: format!("loot_{enemy_id}"),
                    quantity: 1,
                });
            }
            rewards
        }
    }
}

/// Duration-scaled experience with the per-level skill bonus applied.
fn harvesting_experience(duration_ms: u64, skill_level: u32, config: &RewardConfig) -> u64 {
    let base = base_experience(duration_ms) as f64;
    let bonus = 1.0 + config.skill_bonus_per_level * f64::from(skill_level);
    (base * bonus).round() as u64
}

fn base_experience(duration_ms: u64) -> u64 {
    (duration_ms / 1_000).max(1) * BASE_XP_PER_SECOND
}
