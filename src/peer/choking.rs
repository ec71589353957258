use rand::Rng as _;

use crate::pool::PeerId;

/// What the scheduler knows about one connection when planning a round.
#[derive(Debug, Clone)]
pub struct PeerView {
    pub id: PeerId,
    pub interested: bool,
    /// Upload rate under the seed policy, download rate otherwise.
    pub rate: f64,
    /// How many pieces the peer is known to have.
    pub known_pieces: usize,
}

/// Plans one choking round: the returned peers are unchoked, everyone else
/// is choked.
///
/// Candidates are the interested peers (all peers on the bootstrap round).
/// The top `tit_for_tat` candidates by rate get reciprocal slots; from the
/// remainder, `optimistic` more are drawn at random, weighting peers with
/// zero known pieces `newcomer_weight` times higher so newcomers can
/// bootstrap. At most `tit_for_tat + optimistic` peers are unchoked.
pub fn plan_unchokes(
    views: &[PeerView],
    tit_for_tat: usize,
    optimistic: usize,
    newcomer_weight: u32,
    bootstrap: bool,
) -> Vec<PeerId> {
    let mut candidates: Vec<&PeerView> = views
        .iter()
        .filter(|v| v.interested || bootstrap)
        .collect();
    candidates.sort_by(|a, b| {
        b.rate
            .partial_cmp(&a.rate)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut unchoked: Vec<PeerId> = candidates
        .iter()
        .take(tit_for_tat)
        .map(|v| v.id.clone())
        .collect();

    let mut remainder: Vec<&PeerView> = candidates.into_iter().skip(tit_for_tat).collect();
    let weight = |v: &PeerView| -> u32 {
        if v.known_pieces == 0 {
            newcomer_weight.max(1)
        } else {
            1
        }
    };

    let mut rng = rand::rng();
    for _ in 0..optimistic {
        let total: u32 = remainder.iter().map(|v| weight(v)).sum();
        if total == 0 {
            break;
        }
        let mut roll = rng.random_range(0..total);
        let mut picked = 0;
        for (i, v) in remainder.iter().enumerate() {
            let w = weight(v);
            if roll < w {
                picked = i;
                break;
            }
            roll -= w;
        }
        unchoked.push(remainder.remove(picked).id.clone());
    }

    unchoked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(name: &str, interested: bool, rate: f64, known: usize) -> PeerView {
        PeerView {
            id: PeerId::from(name),
            interested,
            rate,
            known_pieces: known,
        }
    }

    #[test]
    fn test_unchoke_count_never_exceeds_slots() {
        let views: Vec<PeerView> = (0..10)
            .map(|i| view(&format!("p{i}"), true, i as f64, 5))
            .collect();
        for _ in 0..50 {
            let unchoked = plan_unchokes(&views, 3, 1, 3, false);
            assert!(unchoked.len() <= 4);
            // No peer is unchoked twice.
            let mut seen = unchoked.clone();
            seen.dedup();
            assert_eq!(seen.len(), unchoked.len());
        }
    }

    #[test]
    fn test_fastest_interested_peers_win_reciprocal_slots() {
        let views = vec![
            view("slow", true, 1.0, 5),
            view("fast", true, 100.0, 5),
            view("mid", true, 10.0, 5),
            view("idle", false, 1000.0, 5),
        ];
        let unchoked = plan_unchokes(&views, 2, 0, 3, false);
        assert_eq!(unchoked.len(), 2);
        assert!(unchoked.contains(&PeerId::from("fast")));
        assert!(unchoked.contains(&PeerId::from("mid")));
        assert!(!unchoked.contains(&PeerId::from("idle")));
    }

    #[test]
    fn test_bootstrap_round_considers_uninterested_peers() {
        let views = vec![view("quiet", false, 0.0, 0)];
        assert!(plan_unchokes(&views, 1, 0, 3, false).is_empty());
        let unchoked = plan_unchokes(&views, 1, 0, 3, true);
        assert_eq!(unchoked, vec![PeerId::from("quiet")]);
    }

    #[test]
    fn test_optimistic_pick_draws_from_remainder() {
        let views = vec![
            view("fast", true, 100.0, 5),
            view("a", true, 1.0, 5),
            view("b", true, 1.0, 0),
        ];
        for _ in 0..50 {
            let unchoked = plan_unchokes(&views, 1, 1, 3, false);
            assert_eq!(unchoked.len(), 2);
            assert_eq!(unchoked[0], PeerId::from("fast"));
            assert!(unchoked[1] == PeerId::from("a") || unchoked[1] == PeerId::from("b"));
        }
    }
}
