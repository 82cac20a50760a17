//! Match state and the authoritative game actor
//!
//! One task owns each match. Everything that touches match state arrives as a
//! [`MatchCommand`] on its mailbox: session joins and leaves, raw controller
//! input, the two periodic ticks and the deferred reload/round-break messages.

use dashmap::DashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::GameRules;
use crate::maps::{GameMap, MapSource};
use crate::ws::protocol::{parse_player_message, EntityPosition, ServerMsg};

use super::combat::CombatSystem;
use super::geometry::Point;
use super::physics::PhysicsSystem;
use super::player::{Player, PlayerId, SessionId};
use super::shots::{Shot, ShotRegistry, ShotRegistryError, ShotRegistryHandle};
use super::sink::{Sink, SinkId};
use super::snapshot::SnapshotBuilder;

pub type MatchId = u64;

const MAILBOX_CAPACITY: usize = 1024;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Waiting for a spectator and at least two players
    AwaitingMinimumPlayers,
    /// Map loaded, respawn pending
    RoundBreak,
    /// Simulation running
    RoundInProgress,
    /// All rounds played
    GameOver,
}

/// Messages accepted by the game actor
#[derive(Debug)]
pub enum MatchCommand {
    JoinInput {
        session: SessionId,
        name: String,
        reply: oneshot::Sender<Result<PlayerId, JoinError>>,
    },
    LeaveInput {
        session: SessionId,
    },
    JoinSpectator {
        sink: Sink,
    },
    LeaveSpectator {
        sink_id: SinkId,
    },
    JoinLifecycle {
        sink: Sink,
    },
    LeaveLifecycle {
        sink_id: SinkId,
    },
    PlayerInput {
        session: SessionId,
        raw: String,
    },
    SimTick,
    BroadcastTick,
    /// Deferred: a player's reload has finished
    ReloadComplete {
        session: SessionId,
    },
    /// Deferred: the break before `round` is over
    RoundBreakElapsed {
        round: u32,
    },
}

/// Reasons an input session cannot join
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("nick is not available")]
    NameTaken,

    #[error("game has ended")]
    MatchClosed,

    #[error("session already joined")]
    AlreadyJoined,
}

/// Match state (owned by the match task)
pub struct MatchState {
    pub id: MatchId,
    pub phase: MatchPhase,
    /// Rounds started so far; never decreases
    pub round: u32,
    /// Keyed by session, iterated in join order
    pub players: BTreeMap<SessionId, Player>,
    pub map: GameMap,
    /// Last shot id handed out
    pub shots_fired: u64,
    next_player_id: u32,
    rng: ChaCha8Rng,
}

impl MatchState {
    pub fn new(id: MatchId, seed: u64) -> Self {
        Self {
            id,
            phase: MatchPhase::AwaitingMinimumPlayers,
            round: 0,
            players: BTreeMap::new(),
            map: GameMap::empty(),
            shots_fired: 0,
            next_player_id: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn is_name_taken(&self, name: &str) -> bool {
        self.players.values().any(|p| p.name == name)
    }

    /// Register a player for `session`. New players sit out, dead at the
    /// origin, until the next round respawns everyone.
    pub fn add_player(&mut self, session: SessionId, name: String) -> Result<PlayerId, JoinError> {
        if self.is_name_taken(&name) {
            return Err(JoinError::NameTaken);
        }
        let id = PlayerId(self.next_player_id);
        self.next_player_id += 1;

        let mut player = Player::new(id, session, name, Point::default());
        player.kill();
        self.players.insert(session, player);
        Ok(id)
    }

    pub fn player_by_id_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.values_mut().find(|p| p.id == id)
    }

    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|p| p.alive).count()
    }

    /// The round victor, if exactly one player is alive
    pub fn check_round_end(&self) -> Option<PlayerId> {
        let mut alive = self.players.values().filter(|p| p.alive);
        match (alive.next(), alive.next()) {
            (Some(victor), None) => Some(victor.id),
            _ => None,
        }
    }

    /// Pick one spawn point per player. The spawn list is cut into as many
    /// equal ranges as there are players and player `i` draws uniformly from
    /// range `i`, which keeps simultaneous spawns apart.
    pub fn spawn_positions(&mut self) -> Vec<Point> {
        let spawns = &self.map.spawn_points;
        let count = self.players.len();
        if count == 0 || spawns.is_empty() {
            return Vec::new();
        }

        let partition = (spawns.len() / count).max(1);
        (0..count)
            .map(|i| {
                let index = (i * partition + self.rng.gen_range(0..partition)) % spawns.len();
                spawns[index]
            })
            .collect()
    }

    pub fn respawn_all(&mut self) {
        let positions = self.spawn_positions();
        for (player, spawn) in self.players.values_mut().zip(positions) {
            player.respawn(spawn);
        }
    }

    /// Credit a kill: the target dies, the shooter scores one point
    pub fn record_kill(&mut self, shooter: PlayerId, target: PlayerId) {
        if let Some(victim) = self.player_by_id_mut(target) {
            victim.kill();
        }
        if let Some(killer) = self.player_by_id_mut(shooter) {
            killer.score += 1;
        }
    }

    pub fn award_round_victory(&mut self, victor: PlayerId, bonus: u32) {
        if let Some(player) = self.player_by_id_mut(victor) {
            player.score += bonus;
        }
    }

    pub fn scoreboard(&self) -> ServerMsg {
        ServerMsg::ScoreboardUpdate {
            scores: self.players.values().map(|p| (p.id, p.score)).collect(),
        }
    }

    /// Highest score; ties go to the lowest player id
    pub fn overall_winner(&self) -> Option<&Player> {
        self.players
            .values()
            .max_by(|a, b| a.score.cmp(&b.score).then(b.id.cmp(&a.id)))
    }

    pub fn living_positions(&self) -> Vec<(PlayerId, Point)> {
        self.players
            .values()
            .filter(|p| p.alive)
            .map(|p| (p.id, p.position))
            .collect()
    }

    pub fn player_positions(&self) -> Vec<EntityPosition> {
        self.players
            .values()
            .filter(|p| p.alive)
            .map(Player::entity_position)
            .collect()
    }
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: MatchId,
    mailbox: mpsc::Sender<MatchCommand>,
    player_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    async fn send(&self, cmd: MatchCommand) {
        if self.mailbox.send(cmd).await.is_err() {
            debug!(match_id = self.id, "Match mailbox closed");
        }
    }

    /// Register an input session under a display name
    pub async fn join_input(&self, session: SessionId, name: String) -> Result<PlayerId, JoinError> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(MatchCommand::JoinInput {
                session,
                name,
                reply,
            })
            .await
            .map_err(|_| JoinError::MatchClosed)?;
        response.await.map_err(|_| JoinError::MatchClosed)?
    }

    pub async fn leave_input(&self, session: SessionId) {
        self.send(MatchCommand::LeaveInput { session }).await;
    }

    pub async fn player_input(&self, session: SessionId, raw: String) {
        self.send(MatchCommand::PlayerInput { session, raw }).await;
    }

    pub async fn join_spectator(&self, sink: Sink) {
        self.send(MatchCommand::JoinSpectator { sink }).await;
    }

    pub async fn leave_spectator(&self, sink_id: SinkId) {
        self.send(MatchCommand::LeaveSpectator { sink_id }).await;
    }

    pub async fn join_lifecycle(&self, sink: Sink) {
        self.send(MatchCommand::JoinLifecycle { sink }).await;
    }

    pub async fn leave_lifecycle(&self, sink_id: SinkId) {
        self.send(MatchCommand::LeaveLifecycle { sink_id }).await;
    }
}

/// Registry of all active matches. Owns id allocation and match seeding.
pub struct MatchRegistry {
    matches: DashMap<MatchId, MatchHandle>,
    next_match_id: AtomicU64,
    next_session_id: AtomicU64,
    next_sink_id: AtomicU64,
    rules: GameRules,
    map_source: Arc<dyn MapSource>,
    seed: Option<u64>,
}

impl MatchRegistry {
    pub fn new(rules: GameRules, map_source: Arc<dyn MapSource>, seed: Option<u64>) -> Self {
        Self {
            matches: DashMap::new(),
            next_match_id: AtomicU64::new(0),
            next_session_id: AtomicU64::new(0),
            next_sink_id: AtomicU64::new(0),
            rules,
            map_source,
            seed,
        }
    }

    /// Create a match and spawn its actor. The match is dropped from the
    /// registry once the actor stops.
    pub fn create_match(self: &Arc<Self>) -> MatchHandle {
        let id = self.next_match_id.fetch_add(1, Ordering::Relaxed);
        let seed = match self.seed {
            Some(base) => base.wrapping_add(id),
            None => rand::random::<u64>(),
        };

        let (game_match, handle) =
            GameMatch::new(id, seed, self.rules.clone(), self.map_source.clone());
        self.matches.insert(id, handle.clone());

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            game_match.run().await;
            registry.remove(id);
            info!(match_id = id, "Match removed from registry");
        });

        info!(match_id = id, "Created new match");
        handle
    }

    pub fn get(&self, id: MatchId) -> Option<MatchHandle> {
        self.matches.get(&id).map(|m| m.value().clone())
    }

    pub fn remove(&self, id: MatchId) -> Option<MatchHandle> {
        self.matches.remove(&id).map(|(_, h)| h)
    }

    pub fn allocate_session(&self) -> SessionId {
        SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn allocate_sink(&self) -> SinkId {
        SinkId(self.next_sink_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().player_count())
            .sum()
    }
}

/// The authoritative game actor
pub struct GameMatch {
    state: MatchState,
    rules: GameRules,
    mailbox: mpsc::Receiver<MatchCommand>,
    /// For ticks and deferred messages addressed to ourselves
    self_tx: mpsc::Sender<MatchCommand>,
    shots: ShotRegistryHandle,
    map_source: Arc<dyn MapSource>,
    spectator: Option<Sink>,
    lifecycle: Option<Sink>,
    lifecycle_seen: bool,
    snapshot_builder: SnapshotBuilder,
    player_count: Arc<AtomicUsize>,
}

impl GameMatch {
    /// Create a new match
    pub fn new(
        id: MatchId,
        seed: u64,
        rules: GameRules,
        map_source: Arc<dyn MapSource>,
    ) -> (Self, MatchHandle) {
        let (tx, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = MatchHandle {
            id,
            mailbox: tx.clone(),
            player_count: player_count.clone(),
        };

        let game_match = Self {
            state: MatchState::new(id, seed),
            rules,
            mailbox,
            self_tx: tx,
            shots: ShotRegistry::spawn(),
            map_source,
            spectator: None,
            lifecycle: None,
            lifecycle_seen: false,
            snapshot_builder: SnapshotBuilder::new(),
            player_count,
        };

        (game_match, handle)
    }

    /// Process the mailbox until the match is abandoned
    pub async fn run(mut self) {
        info!(match_id = self.state.id, "Match started");

        let sim_ticker = self.spawn_ticker(self.rules.sim_tick, || MatchCommand::SimTick);
        let broadcast_ticker =
            self.spawn_ticker(self.rules.broadcast_tick, || MatchCommand::BroadcastTick);

        while let Some(cmd) = self.mailbox.recv().await {
            self.handle(cmd).await;

            if self.is_abandoned() {
                info!(match_id = self.state.id, "Every participant left, stopping match");
                break;
            }
        }

        sim_ticker.abort();
        broadcast_ticker.abort();

        info!(
            match_id = self.state.id,
            rounds = self.state.round,
            frames = self.snapshot_builder.frames_built(),
            "Match stopped"
        );
    }

    /// Periodic source feeding `make()` into the mailbox. Late ticks queue up
    /// behind whatever the actor is doing; none are dropped.
    fn spawn_ticker(&self, period: Duration, make: fn() -> MatchCommand) -> JoinHandle<()> {
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                ticker.tick().await;
                if tx.send(make()).await.is_err() {
                    break;
                }
            }
        })
    }

    /// Deliver `cmd` back to this actor after `delay`
    fn schedule(&self, delay: Duration, cmd: MatchCommand) {
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(cmd).await;
        });
    }

    fn is_abandoned(&self) -> bool {
        self.lifecycle_seen
            && self.lifecycle.is_none()
            && self.spectator.is_none()
            && self.state.players.is_empty()
    }

    async fn handle(&mut self, cmd: MatchCommand) {
        match cmd {
            MatchCommand::JoinInput {
                session,
                name,
                reply,
            } => {
                let result = self.handle_join_input(session, name);
                let joined = result.is_ok();
                let _ = reply.send(result);
                if joined {
                    self.maybe_start_round().await;
                }
            }
            MatchCommand::LeaveInput { session } => self.handle_leave_input(session).await,
            MatchCommand::JoinSpectator { sink } => {
                if self.spectator.is_some() {
                    debug!(match_id = self.state.id, sink_id = sink.id().0, "Spectator slot taken, ignoring");
                    return;
                }
                info!(match_id = self.state.id, sink_id = sink.id().0, "Spectator joined");
                self.spectator = Some(sink);
                self.maybe_start_round().await;
            }
            MatchCommand::LeaveSpectator { sink_id } => {
                if self.spectator.as_ref().is_some_and(|s| s.id() == sink_id) {
                    info!(match_id = self.state.id, "Spectator left");
                    self.spectator = None;
                }
            }
            MatchCommand::JoinLifecycle { sink } => {
                if self.lifecycle.is_some() {
                    debug!(match_id = self.state.id, sink_id = sink.id().0, "Lifecycle slot taken, ignoring");
                    return;
                }
                self.lifecycle = Some(sink);
                self.lifecycle_seen = true;
                self.notify(ServerMsg::NewGame {
                    match_id: self.state.id,
                });
            }
            MatchCommand::LeaveLifecycle { sink_id } => {
                if self.lifecycle.as_ref().is_some_and(|s| s.id() == sink_id) {
                    info!(match_id = self.state.id, "Lifecycle sink left");
                    self.lifecycle = None;
                }
            }
            MatchCommand::PlayerInput { session, raw } => {
                if let Some(player) = self.state.players.get_mut(&session) {
                    player.queue_input(parse_player_message(&raw));
                }
            }
            MatchCommand::SimTick => {
                if self.state.phase == MatchPhase::RoundInProgress {
                    if let Err(e) = self.simulate().await {
                        error!(match_id = self.state.id, error = %e, "Simulation tick failed");
                    }
                }
            }
            MatchCommand::BroadcastTick => {
                if let Err(e) = self.broadcast_positions().await {
                    error!(match_id = self.state.id, error = %e, "Position broadcast failed");
                }
            }
            MatchCommand::ReloadComplete { session } => {
                if let Some(player) = self.state.players.get_mut(&session) {
                    player.reloading = false;
                }
            }
            MatchCommand::RoundBreakElapsed { round } => {
                if self.state.phase == MatchPhase::RoundBreak && self.state.round == round {
                    self.begin_round();
                }
            }
        }
    }

    fn handle_join_input(&mut self, session: SessionId, name: String) -> Result<PlayerId, JoinError> {
        if self.state.phase == MatchPhase::GameOver {
            return Err(JoinError::MatchClosed);
        }
        if self.state.players.contains_key(&session) {
            warn!(match_id = self.state.id, session_id = %session, "Session already joined");
            return Err(JoinError::AlreadyJoined);
        }

        let player_id = self.state.add_player(session, name.clone())?;
        self.player_count
            .store(self.state.players.len(), Ordering::Relaxed);

        info!(
            match_id = self.state.id,
            player_id = %player_id,
            session_id = %session,
            name = %name,
            player_count = self.state.players.len(),
            "Player joined match"
        );

        self.notify(ServerMsg::NewPlayer { player_id, name });
        Ok(player_id)
    }

    async fn handle_leave_input(&mut self, session: SessionId) {
        let Some(player) = self.state.players.remove(&session) else {
            return;
        };
        self.player_count
            .store(self.state.players.len(), Ordering::Relaxed);

        // Shots must not outlive their owner.
        match self.shots.snapshot().await {
            Ok(shots) => {
                for shot in shots.iter().filter(|s| s.owner == player.id) {
                    if let Err(e) = self.shots.delete(shot.id).await {
                        warn!(match_id = self.state.id, error = %e, "Failed to drop shot of leaving player");
                    }
                }
            }
            Err(e) => warn!(match_id = self.state.id, error = %e, "Failed to read shots"),
        }

        info!(
            match_id = self.state.id,
            player_id = %player.id,
            session_id = %session,
            "Player left match"
        );
    }

    /// Start a round when a display and enough players are present
    async fn maybe_start_round(&mut self) {
        if self.state.phase == MatchPhase::AwaitingMinimumPlayers
            && self.spectator.is_some()
            && self.state.players.len() >= 2
        {
            self.start_round().await;
        }
    }

    /// Load the next map and schedule the respawn. On failure the match is
    /// left untouched.
    async fn start_round(&mut self) {
        let next_round = self.state.round + 1;

        let map = match self.map_source.fetch().await {
            Ok(map) => map,
            Err(e) => {
                error!(
                    match_id = self.state.id,
                    round = next_round,
                    error = %e,
                    "Map fetch failed, round start aborted"
                );
                return;
            }
        };

        self.state.round = next_round;
        self.state.map = map;
        self.shots = ShotRegistry::spawn();
        self.state.phase = MatchPhase::RoundBreak;
        self.schedule(
            self.rules.round_break,
            MatchCommand::RoundBreakElapsed { round: next_round },
        );

        info!(
            match_id = self.state.id,
            round = next_round,
            walls = self.state.map.walls.len(),
            "Round loading"
        );
    }

    fn begin_round(&mut self) {
        self.state.respawn_all();
        self.state.phase = MatchPhase::RoundInProgress;

        self.notify(ServerMsg::NewRound {
            players: self.state.player_positions(),
            map_json: self.state.map.to_json(),
        });

        info!(
            match_id = self.state.id,
            round = self.state.round,
            players = self.state.players.len(),
            "Round started"
        );
    }

    /// One fine-grained simulation step
    async fn simulate(&mut self) -> Result<(), ShotRegistryError> {
        // Movement and shooting
        let mut launches = Vec::new();
        for player in self.state.players.values_mut() {
            let input = player.take_input();
            let Some(angle) = PhysicsSystem::apply_input(player, input, &self.state.map) else {
                continue;
            };
            if player.reloading {
                continue;
            }
            player.reloading = true;
            launches.push((player.session, player.id, player.position, angle));
        }

        for (session, owner, position, angle) in launches {
            self.state.shots_fired += 1;
            self.shots
                .add(Shot::new(self.state.shots_fired, owner, position, angle))
                .await?;
            self.schedule(self.rules.reload, MatchCommand::ReloadComplete { session });
        }

        // Shot flight and collisions
        self.shots.advance_all().await?;
        let shots = self.shots.snapshot().await?;
        let outcome = CombatSystem::resolve(
            &shots,
            &self.state.living_positions(),
            &self.state.map.walls,
        );

        for id in outcome.expired {
            self.shots.delete(id).await?;
        }

        for hit in outcome.hits {
            self.state.record_kill(hit.shooter, hit.target);
            info!(
                match_id = self.state.id,
                shooter_id = %hit.shooter,
                target_id = %hit.target,
                shot_id = hit.shot_id,
                alive = self.state.alive_count(),
                "Player killed"
            );
            let scoreboard = self.state.scoreboard();
            self.notify(scoreboard);
            self.shots.delete(hit.shot_id).await?;
        }

        if let Some(victor) = self.state.check_round_end() {
            self.finish_round(victor).await;
        }

        Ok(())
    }

    async fn finish_round(&mut self, victor: PlayerId) {
        info!(match_id = self.state.id, round = self.state.round, victor_id = %victor, "Round won");

        self.notify(ServerMsg::EndRound { victor });
        self.state
            .award_round_victory(victor, self.rules.last_man_standing_bonus);
        let scoreboard = self.state.scoreboard();
        self.notify(scoreboard);

        if self.state.round < self.rules.max_rounds {
            self.state.phase = MatchPhase::AwaitingMinimumPlayers;
            self.start_round().await;
            return;
        }

        self.state.phase = MatchPhase::GameOver;
        let (top_score, winner) = self
            .state
            .overall_winner()
            .map(|p| (p.score, p.name.clone()))
            .unwrap_or_default();
        info!(match_id = self.state.id, top_score, winner = %winner, "Game over");
        self.notify(ServerMsg::EndGame { top_score, winner });
    }

    async fn broadcast_positions(&mut self) -> Result<(), ShotRegistryError> {
        if self.spectator.is_none() || self.state.phase != MatchPhase::RoundInProgress {
            return Ok(());
        }

        let shots = self.shots.snapshot().await?;
        let frame = self
            .snapshot_builder
            .build(self.state.players.values(), &shots);

        if let Some(sink) = &self.spectator {
            if !sink.push(frame.to_string()) {
                warn!(match_id = self.state.id, sink_id = sink.id().0, "Spectator too slow, disconnecting");
                self.spectator = None;
            }
        }
        Ok(())
    }

    /// Push a lifecycle notification without waiting
    fn notify(&mut self, msg: ServerMsg) {
        let Some(sink) = &self.lifecycle else {
            return;
        };
        if !sink.push(msg.to_string()) {
            warn!(match_id = self.state.id, sink_id = sink.id().0, "Lifecycle sink unavailable, disconnecting");
            self.lifecycle = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::sink::SINK_CAPACITY;
    use crate::maps::testing::{open_map, FailingMapSource, StaticMapSource};
    use tokio_test::assert_ok;

    fn state_with_players(names: &[&str]) -> MatchState {
        let mut state = MatchState::new(0, 42);
        for (i, name) in names.iter().enumerate() {
            assert_ok!(state.add_player(SessionId(i as u64), name.to_string()));
        }
        for player in state.players.values_mut() {
            player.respawn(Point::new(0.5, 0.5));
        }
        state
    }

    #[test]
    fn joiner_waits_for_next_respawn() {
        let mut state = state_with_players(&["Alice", "Bob"]);
        assert_ok!(state.add_player(SessionId(7), "Carol".into()));
        assert!(!state.players[&SessionId(7)].alive);
        assert_eq!(state.living_positions().len(), 2);

        state.record_kill(PlayerId(0), PlayerId(1));
        assert_eq!(state.check_round_end(), Some(PlayerId(0)));

        state.map = open_map(&[(0.2, 0.2), (0.5, 0.5), (0.8, 0.8)]);
        state.respawn_all();
        assert_eq!(state.alive_count(), 3);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut state = state_with_players(&["Alice"]);
        assert_eq!(
            state.add_player(SessionId(9), "Alice".into()),
            Err(JoinError::NameTaken)
        );
        assert_eq!(state.add_player(SessionId(9), "Bob".into()), Ok(PlayerId(1)));
    }

    #[test]
    fn sole_survivor_wins_round() {
        let mut state = state_with_players(&["Alice", "Bob", "Carol"]);
        assert_eq!(state.check_round_end(), None);

        state.record_kill(PlayerId(1), PlayerId(0));
        assert_eq!(state.check_round_end(), None);
        state.record_kill(PlayerId(1), PlayerId(2));
        assert_eq!(state.check_round_end(), Some(PlayerId(1)));
    }

    #[test]
    fn simultaneous_wipeout_has_no_victor() {
        let mut state = state_with_players(&["Alice", "Bob", "Carol"]);
        for player in state.players.values_mut() {
            player.kill();
        }
        assert_eq!(state.alive_count(), 0);
        assert_eq!(state.check_round_end(), None);
    }

    #[test]
    fn kill_and_bonus_arithmetic() {
        let mut state = state_with_players(&["Alice", "Bob"]);
        state.record_kill(PlayerId(0), PlayerId(1));
        assert_eq!(state.players[&SessionId(0)].score, 1);
        assert_eq!(state.players[&SessionId(1)].score, 0);
        assert!(!state.players[&SessionId(1)].alive);

        state.award_round_victory(PlayerId(0), 4);
        assert_eq!(state.players[&SessionId(0)].score, 5);
        assert_eq!(state.scoreboard().to_string(), "ScoreboardUpdate::0/5,1/0");
    }

    #[test]
    fn overall_winner_tie_goes_to_lowest_id() {
        let mut state = state_with_players(&["Alice", "Bob", "Carol"]);
        state.players.get_mut(&SessionId(1)).unwrap().score = 3;
        state.players.get_mut(&SessionId(2)).unwrap().score = 3;
        assert_eq!(state.overall_winner().unwrap().name, "Bob");
    }

    #[test]
    fn spawns_come_from_separate_partitions() {
        let mut state = state_with_players(&["Alice", "Bob", "Carol"]);
        state.map = open_map(&[
            (0.1, 0.1),
            (0.2, 0.1),
            (0.3, 0.1),
            (0.4, 0.1),
            (0.5, 0.1),
            (0.6, 0.1),
        ]);

        for _ in 0..20 {
            let spawns = state.spawn_positions();
            assert_eq!(spawns.len(), 3);
            assert!(spawns[0].x <= 0.2 + 1e-9);
            assert!(spawns[1].x > 0.2 + 1e-9 && spawns[1].x <= 0.4 + 1e-9);
            assert!(spawns[2].x > 0.4 + 1e-9);
        }
    }

    #[test]
    fn spawns_are_reproducible_for_a_seed() {
        let map = open_map(&[(0.1, 0.1), (0.2, 0.2), (0.3, 0.3), (0.4, 0.4)]);
        let mut a = state_with_players(&["Alice", "Bob"]);
        let mut b = state_with_players(&["Alice", "Bob"]);
        a.map = map.clone();
        b.map = map;
        assert_eq!(a.spawn_positions(), b.spawn_positions());
    }

    #[test]
    fn more_players_than_spawns_wraps() {
        let mut state = state_with_players(&["Alice", "Bob", "Carol"]);
        state.map = open_map(&[(0.1, 0.1), (0.9, 0.9)]);
        let spawns = state.spawn_positions();
        assert_eq!(spawns[0], Point::new(0.1, 0.1));
        assert_eq!(spawns[1], Point::new(0.9, 0.9));
        assert_eq!(spawns[2], Point::new(0.1, 0.1));
    }

    // --- actor tests ---

    struct Harness {
        registry: Arc<MatchRegistry>,
        handle: MatchHandle,
        lifecycle: mpsc::Receiver<String>,
    }

    impl Harness {
        async fn start(map_source: Arc<dyn MapSource>) -> Self {
            Self::start_with(map_source, GameRules::default()).await
        }

        async fn start_with(map_source: Arc<dyn MapSource>, rules: GameRules) -> Self {
            let registry = Arc::new(MatchRegistry::new(rules, map_source, Some(7)));
            let handle = registry.create_match();
            let (sink, mut lifecycle) = Sink::channel(registry.allocate_sink(), SINK_CAPACITY);
            handle.join_lifecycle(sink).await;
            assert_eq!(lifecycle.recv().await.unwrap(), format!("NewGame::{}", handle.id));
            Self {
                registry,
                handle,
                lifecycle,
            }
        }

        async fn join(&mut self, name: &str) -> SessionId {
            let session = self.registry.allocate_session();
            let id = self.handle.join_input(session, name.into()).await.unwrap();
            assert_eq!(
                self.lifecycle.recv().await.unwrap(),
                format!("NewPlayer::{id}/{name}")
            );
            session
        }

        async fn spectate(&self) -> (SinkId, mpsc::Receiver<String>) {
            let sink_id = self.registry.allocate_sink();
            let (sink, rx) = Sink::channel(sink_id, SINK_CAPACITY);
            self.handle.join_spectator(sink).await;
            (sink_id, rx)
        }
    }

    fn arena() -> GameMap {
        open_map(&[(0.25, 0.5), (0.75, 0.5)])
    }

    /// Extract `(x, y)` text of a player from a position frame
    fn player_in_frame(frame: &str, id: u32) -> Option<(String, String)> {
        let (players, _shots) = frame.split_once(':')?;
        players.split(',').find_map(|entry| {
            let fields: Vec<&str> = entry.split('/').collect();
            (fields.first()? == &id.to_string())
                .then(|| (fields[1].to_string(), fields[2].to_string()))
        })
    }

    /// Ids of the shots in a position frame, sorted
    fn shots_in_frame(frame: &str) -> Vec<u64> {
        let shots = frame.split_once(':').map(|(_, s)| s).unwrap_or("");
        let mut ids: Vec<u64> = shots
            .split(',')
            .filter_map(|entry| entry.split('/').next()?.parse().ok())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Most recent frame currently buffered
    fn latest_frame(frames: &mut mpsc::Receiver<String>) -> Option<String> {
        let mut latest = None;
        while let Ok(frame) = frames.try_recv() {
            latest = Some(frame);
        }
        latest
    }

    #[tokio::test(start_paused = true)]
    async fn round_starts_and_input_moves_player() {
        let map = arena();
        let mut h = Harness::start(Arc::new(StaticMapSource(map.clone()))).await;
        let alice = h.join("Alice").await;
        h.join("Bob").await;
        let (_spectator_id, mut frames) = h.spectate().await;

        let new_round = h.lifecycle.recv().await.unwrap();
        assert_eq!(
            new_round,
            format!(
                "NewRound::0/0.250000/0.500000/0,1/0.750000/0.500000/0::{}",
                map.to_json()
            )
        );

        let first = frames.recv().await.unwrap();
        let (x0, y0) = player_in_frame(&first, 0).unwrap();

        h.handle.player_input(alice, "1000/2:90/".into()).await;

        let mut moved = None;
        for _ in 0..10 {
            let frame = frames.recv().await.unwrap();
            let (x, y) = player_in_frame(&frame, 0).unwrap();
            if y != y0 {
                moved = Some((x, y));
                break;
            }
        }
        let (x, y) = moved.expect("Alice never moved");
        assert_eq!(x, x0);
        assert!(y.parse::<f64>().unwrap() > y0.parse::<f64>().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn kill_ends_round_with_bonus() {
        let mut h = Harness::start(Arc::new(StaticMapSource(arena()))).await;
        let alice = h.join("Alice").await;
        h.join("Bob").await;
        let (_spectator_id, _frames) = h.spectate().await;
        assert!(h.lifecycle.recv().await.unwrap().starts_with("NewRound::"));

        // Alice at x = 0.25 fires east at Bob on the same row.
        h.handle.player_input(alice, "1//0".into()).await;

        assert_eq!(h.lifecycle.recv().await.unwrap(), "ScoreboardUpdate::0/1,1/0");
        assert_eq!(h.lifecycle.recv().await.unwrap(), "EndRound::0");
        assert_eq!(h.lifecycle.recv().await.unwrap(), "ScoreboardUpdate::0/5,1/0");
        // Next round follows after the break.
        assert!(h.lifecycle.recv().await.unwrap().starts_with("NewRound::"));
    }

    #[tokio::test(start_paused = true)]
    async fn mid_round_joiner_sits_out_until_next_round() {
        let mut h = Harness::start(Arc::new(StaticMapSource(arena()))).await;
        let alice = h.join("Alice").await;
        h.join("Bob").await;
        let (_spectator_id, mut frames) = h.spectate().await;
        assert!(h.lifecycle.recv().await.unwrap().starts_with("NewRound::"));

        h.join("Carol").await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let frame = latest_frame(&mut frames).unwrap();
        assert!(player_in_frame(&frame, 2).is_none());

        h.handle.player_input(alice, "1//0".into()).await;

        assert_eq!(h.lifecycle.recv().await.unwrap(), "ScoreboardUpdate::0/1,1/0,2/0");
        assert_eq!(h.lifecycle.recv().await.unwrap(), "EndRound::0");
        assert_eq!(h.lifecycle.recv().await.unwrap(), "ScoreboardUpdate::0/5,1/0,2/0");

        // Carol is spawned with everyone else in the next round.
        let next = h.lifecycle.recv().await.unwrap();
        let players = next.split("::").nth(1).unwrap();
        assert_eq!(players.split(',').count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reload_blocks_second_shot_until_complete() {
        let mut h = Harness::start(Arc::new(StaticMapSource(arena()))).await;
        let alice = h.join("Alice").await;
        h.join("Bob").await;
        let (_spectator_id, mut frames) = h.spectate().await;
        assert!(h.lifecycle.recv().await.unwrap().starts_with("NewRound::"));

        // Fire west, away from Bob.
        h.handle.player_input(alice, "1//180".into()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.handle.player_input(alice, "2//180".into()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(shots_in_frame(&latest_frame(&mut frames).unwrap()), vec![1]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        h.handle.player_input(alice, "3//180".into()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(shots_in_frame(&latest_frame(&mut frames).unwrap()), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn last_round_ends_the_game() {
        let rules = GameRules {
            max_rounds: 1,
            ..GameRules::default()
        };
        let mut h = Harness::start_with(Arc::new(StaticMapSource(arena())), rules).await;
        let alice = h.join("Alice").await;
        h.join("Bob").await;
        let (_spectator_id, _frames) = h.spectate().await;
        assert!(h.lifecycle.recv().await.unwrap().starts_with("NewRound::"));

        h.handle.player_input(alice, "1//0".into()).await;

        assert_eq!(h.lifecycle.recv().await.unwrap(), "ScoreboardUpdate::0/1,1/0");
        assert_eq!(h.lifecycle.recv().await.unwrap(), "EndRound::0");
        assert_eq!(h.lifecycle.recv().await.unwrap(), "ScoreboardUpdate::0/5,1/0");
        assert_eq!(h.lifecycle.recv().await.unwrap(), "EndGame::5/Alice");

        let late = h.registry.allocate_session();
        assert_eq!(
            h.handle.join_input(late, "Carol".into()).await,
            Err(JoinError::MatchClosed)
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.lifecycle.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_player_takes_shots_along() {
        let map = open_map(&[(0.25, 0.5), (0.75, 0.5), (0.5, 0.2)]);
        let mut h = Harness::start(Arc::new(StaticMapSource(map))).await;
        let alice = h.join("Alice").await;
        h.join("Bob").await;
        h.join("Carol").await;
        let (_spectator_id, mut frames) = h.spectate().await;
        assert!(h.lifecycle.recv().await.unwrap().starts_with("NewRound::"));

        h.handle.player_input(alice, "1//180".into()).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(shots_in_frame(&latest_frame(&mut frames).unwrap()), vec![1]);

        h.handle.leave_input(alice).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let frame = latest_frame(&mut frames).unwrap();
        assert!(shots_in_frame(&frame).is_empty());
        assert!(player_in_frame(&frame, 0).is_none());
        assert!(player_in_frame(&frame, 1).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_nick_is_rejected_for_session_only() {
        let mut h = Harness::start(Arc::new(StaticMapSource(arena()))).await;
        h.join("Alice").await;

        let session = h.registry.allocate_session();
        let result = h.handle.join_input(session, "Alice".into()).await;
        assert_eq!(result, Err(JoinError::NameTaken));
        assert_eq!(h.handle.player_count(), 1);

        // The same session cannot register twice, whatever the nick.
        let alice_session = SessionId(0);
        let again = h.handle.join_input(alice_session, "Alicia".into()).await;
        assert_eq!(again, Err(JoinError::AlreadyJoined));

        // Unknown and repeated leaves are no-ops.
        h.handle.leave_input(session).await;
        h.handle.leave_input(SessionId(999)).await;
        h.join("Bob").await;
        assert_eq!(h.handle.player_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_spectator_is_ignored() {
        let mut h = Harness::start(Arc::new(StaticMapSource(arena()))).await;
        h.join("Alice").await;
        h.join("Bob").await;
        let (_first_id, mut first) = h.spectate().await;
        let (second_id, mut second) = h.spectate().await;

        // The ignored sink is dropped by the actor, closing its channel.
        assert!(second.recv().await.is_none());

        // Leave from the rejected sink must not evict the real spectator.
        h.handle.leave_spectator(second_id).await;
        assert!(h.lifecycle.recv().await.unwrap().starts_with("NewRound::"));
        assert!(first.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn map_failure_leaves_match_waiting() {
        let mut h = Harness::start(Arc::new(FailingMapSource)).await;
        h.join("Alice").await;
        h.join("Bob").await;
        let (_spectator_id, mut frames) = h.spectate().await;

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(h.lifecycle.try_recv().is_err());
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_match_leaves_registry() {
        let mut h = Harness::start(Arc::new(StaticMapSource(arena()))).await;
        let alice = h.join("Alice").await;
        assert_eq!(h.registry.active_matches(), 1);
        assert_eq!(h.registry.total_players(), 1);

        h.handle.leave_input(alice).await;
        // Sink ids start at zero and the lifecycle sink was the first allocated.
        h.handle.leave_lifecycle(SinkId(0)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.registry.active_matches(), 0);
        assert!(h.registry.get(h.handle.id).is_none());
    }
}
