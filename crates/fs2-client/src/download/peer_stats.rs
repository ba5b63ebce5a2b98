//! Peer ranking for the download scheduler: prefer peers that are not
//! already remotely queuing this client, prefer favourites over
//! non-favourites, and among otherwise-equal peers prefer the one with
//! fewest active downloads, breaking remaining ties at random so load
//! isn't pinned to whichever peer sorts first.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::SocketAddr;

use rand::Rng;

#[derive(Clone, Copy, Debug)]
pub struct PeerCandidate {
    pub addr: SocketAddr,
    pub is_favourite: bool,
    pub active_downloads: u32,
    /// True if this peer has already told us (via a prior failed fetch)
    /// that it is busy queuing our own requests remotely.
    pub remotely_queued: bool,
}

pub struct PeerStats {
    active_downloads: HashMap<SocketAddr, u32>,
    favourites: std::collections::HashSet<SocketAddr>,
    remotely_queued: std::collections::HashSet<SocketAddr>,
}

impl PeerStats {
    pub fn new(favourites: std::collections::HashSet<SocketAddr>) -> Self {
        Self {
            active_downloads: HashMap::new(),
            favourites,
            remotely_queued: std::collections::HashSet::new(),
        }
    }

    pub fn begin_download(&mut self, addr: SocketAddr) {
        *self.active_downloads.entry(addr).or_insert(0) += 1;
    }

    pub fn end_download(&mut self, addr: SocketAddr) {
        if let Some(count) = self.active_downloads.get_mut(&addr) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn mark_remotely_queued(&mut self, addr: SocketAddr) {
        self.remotely_queued.insert(addr);
    }

    pub fn clear_remotely_queued(&mut self, addr: SocketAddr) {
        self.remotely_queued.remove(&addr);
    }

    fn candidate(&self, addr: SocketAddr) -> PeerCandidate {
        PeerCandidate {
            addr,
            is_favourite: self.favourites.contains(&addr),
            active_downloads: self.active_downloads.get(&addr).copied().unwrap_or(0),
            remotely_queued: self.remotely_queued.contains(&addr),
        }
    }

    /// Picks the best of `sources` to fetch a chunk from, or `None` if
    /// `sources` is empty (the caller treats that as "no sources" for
    /// this dispatch batch). Ties after ranking are broken at random so
    /// load isn't pinned to whichever peer happens to sort first.
    pub fn pick_best(&self, sources: &[SocketAddr]) -> Option<SocketAddr> {
        let mut candidates: Vec<PeerCandidate> = sources.iter().map(|&a| self.candidate(a)).collect();
        candidates.sort_by(compare_candidates);
        let best = candidates.first()?;
        let tied: Vec<PeerCandidate> = candidates
            .iter()
            .take_while(|c| compare_candidates(c, best) == Ordering::Equal)
            .copied()
            .collect();
        break_tie(&tied)
    }
}

fn compare_candidates(a: &PeerCandidate, b: &PeerCandidate) -> Ordering {
    // Remotely-queued peers rank worst regardless of other factors.
    a.remotely_queued
        .cmp(&b.remotely_queued)
        // Favourites rank before non-favourites.
        .then_with(|| b.is_favourite.cmp(&a.is_favourite))
        // Fewer active downloads wins.
        .then_with(|| a.active_downloads.cmp(&b.active_downloads))
}

/// Breaks a tie among equally-ranked candidates uniformly at random,
/// rather than always preferring whichever one happened to sort first.
pub fn break_tie(candidates: &[PeerCandidate]) -> Option<SocketAddr> {
    if candidates.is_empty() {
        return None;
    }
    let idx = rand::thread_rng().gen_range(0..candidates.len());
    Some(candidates[idx].addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn favourite_beats_non_favourite() {
        let mut favourites = std::collections::HashSet::new();
        favourites.insert(addr(1));
        let stats = PeerStats::new(favourites);
        let best = stats.pick_best(&[addr(1), addr(2)]);
        assert_eq!(best, Some(addr(1)));
    }

    #[test]
    fn fewer_active_downloads_wins_among_equals() {
        let mut stats = PeerStats::new(Default::default());
        stats.begin_download(addr(1));
        stats.begin_download(addr(1));
        stats.begin_download(addr(2));
        let best = stats.pick_best(&[addr(1), addr(2)]);
        assert_eq!(best, Some(addr(2)));
    }

    #[test]
    fn remotely_queued_peer_ranks_last() {
        let mut stats = PeerStats::new(Default::default());
        stats.mark_remotely_queued(addr(1));
        let best = stats.pick_best(&[addr(1), addr(2)]);
        assert_eq!(best, Some(addr(2)));
    }

    #[test]
    fn empty_sources_yield_no_pick() {
        let stats = PeerStats::new(Default::default());
        assert_eq!(stats.pick_best(&[]), None);
    }
}
