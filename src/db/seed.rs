use anyhow::{anyhow, Result};
use sqlx::SqlitePool;

use super::{add_roster_entry, insert_league_member, list_players};

const DEMO_TEAM_NAMES: &[&str] = &[
    "Spike Rushers",
    "Eco Round Heroes",
    "Thrifty Op",
    "Ult Orb Collectors",
    "Retake Masters",
    "Lurk Brigade",
    "Full Buy FC",
    "Plant & Pray",
];

/// Snake-draft order: member index for each pick.
fn snake_order(members: usize, roster_size: usize) -> Vec<usize> {
    (0..roster_size)
        .flat_map(|round| {
            let picks: Vec<usize> = if round % 2 == 0 {
                (0..members).collect()
            } else {
                (0..members).rev().collect()
            };
            picks
        })
        .collect()
}

/// Create `members` demo league members and snake-draft the current player
/// pool into their rosters, most expensive first. Returns the members created.
pub async fn seed_demo_league(pool: &SqlitePool, members: usize, roster_size: usize) -> Result<usize> {
    if members == 0 || members > DEMO_TEAM_NAMES.len() {
        return Err(anyhow!("members must be between 1 and {}", DEMO_TEAM_NAMES.len()));
    }

    let mut tx = pool.begin().await?;

    let players = list_players(&mut tx).await?;
    if players.len() < members * roster_size {
        return Err(anyhow!(
            "need {} players for {} rosters of {}, only {} stored (run a sync first)",
            members * roster_size,
            members,
            roster_size,
            players.len()
        ));
    }

    let mut created = Vec::with_capacity(members);
    for (i, team_name) in DEMO_TEAM_NAMES.iter().take(members).enumerate() {
        let member = insert_league_member(&mut tx, &format!("demo-user-{}", i + 1), team_name).await?;
        created.push(member);
    }

    for (player, member_idx) in players.iter().zip(snake_order(members, roster_size)) {
        add_roster_entry(&mut tx, &created[member_idx].id, &player.id).await?;
    }

    tx.commit().await?;
    tracing::info!("Seeded demo league: {} members, {} players each", members, roster_size);
    Ok(created.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_player_if_absent, list_league_members, test_pool};
    use crate::models::{PlayerRole, Region};

    #[test]
    fn test_snake_order() {
        assert_eq!(snake_order(3, 2), vec![0, 1, 2, 2, 1, 0]);
    }

    #[tokio::test]
    async fn test_seed_requires_enough_players() {
        let pool = test_pool().await;
        assert!(seed_demo_league(&pool, 2, 5).await.is_err());
    }

    #[tokio::test]
    async fn test_seed_creates_members() {
        let pool = test_pool().await;
        {
            let mut conn = pool.acquire().await.unwrap();
            for i in 0..4 {
                insert_player_if_absent(&mut conn, &format!("player{}", i), None, PlayerRole::Flex, Region::Emea, 10.0)
                    .await
                    .unwrap();
            }
        }
        assert_eq!(seed_demo_league(&pool, 2, 2).await.unwrap(), 2);

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(list_league_members(&mut conn).await.unwrap().len(), 2);
    }
}
