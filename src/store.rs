//! The player persistence façade over SQLite.
//!
//! [`PlayerStore`] is the single entry point game logic talks to: it
//! loads and saves [`PlayerRecord`]s, appends death history, delivers
//! mail into depots, answers the name/account/guild/town lookup family
//! and maintains two caches in front of the store:
//!
//! - a bidirectional name ↔ identifier cache ([`crate::NameCache`]),
//!   fed lazily and never evicted;
//! - a rolling-window unjust-kill count cache
//!   ([`crate::UnjustKillCache`]) with per-window staleness tracking.
//!
//! One `PlayerStore` is constructed per process and shared by reference
//! across request-handling workers; every method takes `&self`.
//!
//! # Locking
//!
//! Three `parking_lot` mutexes: kill cache, connection, name cache.
//! Acquisition order is always kill cache → connection → name cache
//! (each optional), so the layer cannot deadlock. Cache locks are held
//! across the store round-trip on a miss, which is what keeps two
//! concurrent cold reads of the same key down to a single store query.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::items::{self, Item, ItemBlock, ItemRow};
use crate::kill_cache::{UnjustKillCache, WindowSample};
use crate::name_cache::NameCache;
use crate::types::{
    AccountId, DeathEntry, GuildId, PlayerFlag, PlayerFlags, PlayerId, PlayerRecord, Position,
    TownId, UnjustKillPeriod, WorldId,
};

/// Player persistence and caching façade. See the module docs.
pub struct PlayerStore {
    conn: Mutex<Connection>,
    names: Mutex<NameCache>,
    kills: Mutex<UnjustKillCache>,
    db_path: PathBuf,
}

impl std::fmt::Debug for PlayerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl PlayerStore {
    /// Open (or create) the player database at `path`.
    ///
    /// The schema is created if it does not exist. WAL mode is enabled
    /// when `config.wal_mode` is `true`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(&format!("PRAGMA busy_timeout = {};", config.busy_timeout_ms))?;

        Self::create_schema(&conn)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "Player store opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            names: Mutex::new(NameCache::new()),
            kills: Mutex::new(UnjustKillCache::new(config.zero_kill_recheck_secs)),
            db_path,
        })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            names: Mutex::new(NameCache::new()),
            kills: Mutex::new(UnjustKillCache::new(config.zero_kill_recheck_secs)),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS players (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL UNIQUE COLLATE NOCASE,
                account_id  INTEGER NOT NULL,
                world_id    INTEGER NOT NULL DEFAULT 0,
                group_id    INTEGER NOT NULL DEFAULT 0,
                flags       INTEGER NOT NULL DEFAULT 0,
                level       INTEGER NOT NULL DEFAULT 1,
                experience  INTEGER NOT NULL DEFAULT 0,
                health      INTEGER NOT NULL DEFAULT 100,
                health_max  INTEGER NOT NULL DEFAULT 100,
                mana        INTEGER NOT NULL DEFAULT 0,
                mana_max    INTEGER NOT NULL DEFAULT 0,
                town_id     INTEGER NOT NULL DEFAULT 0,
                pos_x       INTEGER NOT NULL DEFAULT 0,
                pos_y       INTEGER NOT NULL DEFAULT 0,
                pos_z       INTEGER NOT NULL DEFAULT 0,
                last_login  INTEGER NOT NULL DEFAULT 0,
                last_logout INTEGER NOT NULL DEFAULT 0,
                last_ip     INTEGER NOT NULL DEFAULT 0,
                online      INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS guilds (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE
            );
            CREATE TABLE IF NOT EXISTS towns (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                name       TEXT NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS player_items (
                player_id  INTEGER NOT NULL REFERENCES players(id) ON DELETE CASCADE,
                sid        INTEGER NOT NULL,
                pid        INTEGER NOT NULL,
                slot       INTEGER NOT NULL,
                kind       INTEGER NOT NULL,
                count      INTEGER NOT NULL,
                attributes TEXT NOT NULL,
                PRIMARY KEY (player_id, sid)
            );
            CREATE TABLE IF NOT EXISTS player_depot_items (
                player_id  INTEGER NOT NULL REFERENCES players(id) ON DELETE CASCADE,
                depot_id   INTEGER NOT NULL,
                sid        INTEGER NOT NULL,
                pid        INTEGER NOT NULL,
                slot       INTEGER NOT NULL,
                kind       INTEGER NOT NULL,
                count      INTEGER NOT NULL,
                attributes TEXT NOT NULL,
                PRIMARY KEY (player_id, depot_id, sid)
            );
            CREATE TABLE IF NOT EXISTS player_deaths (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                player_id   INTEGER NOT NULL REFERENCES players(id) ON DELETE CASCADE,
                time        INTEGER NOT NULL,
                killer_name TEXT NOT NULL,
                killer_id   INTEGER,
                unjustified INTEGER NOT NULL DEFAULT 0,
                UNIQUE (player_id, time, killer_name)
            );
            CREATE INDEX IF NOT EXISTS idx_player_deaths_killer
                ON player_deaths (killer_id, unjustified, time);",
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Load / save
    // ------------------------------------------------------------------

    /// Load a player by display name into `record`.
    ///
    /// With `preload` set, only identifier, account, group and flags are
    /// populated (the lightweight pre-authentication path); otherwise the
    /// full attributes, inventory and session timestamps are loaded.
    ///
    /// Returns `Ok(false)` if no player with that name exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults and
    /// [`StoreError::Serialization`] on malformed item attribute blobs.
    pub fn load_player(
        &self,
        record: &mut PlayerRecord,
        name: &str,
        preload: bool,
    ) -> Result<bool> {
        let start = Instant::now();
        let conn = self.conn.lock();

        let Some((id, canonical)) = self.resolve_guid_on(&conn, name)? else {
            return Ok(false);
        };

        if preload {
            let row = conn
                .prepare_cached("SELECT account_id, group_id, flags FROM players WHERE id = ?1")?
                .query_row(params![id.0], |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })
                .optional()?;
            let Some((account_id, group_id, flags)) = row else {
                return Ok(false);
            };
            record.id = Some(id);
            record.name = canonical;
            record.account_id = AccountId(account_id);
            record.group_id = group_id;
            record.flags = PlayerFlags(flags as u64);
            return Ok(true);
        }

        let row = conn
            .prepare_cached(
                "SELECT account_id, world_id, group_id, flags, level, experience,
                        health, health_max, mana, mana_max, town_id,
                        pos_x, pos_y, pos_z, last_login, last_logout, last_ip
                 FROM players WHERE id = ?1",
            )?
            .query_row(params![id.0], |row| {
                Ok(PlayerRecord {
                    id: Some(id),
                    name: String::new(), // filled below
                    account_id: AccountId(row.get(0)?),
                    world_id: WorldId(row.get(1)?),
                    group_id: row.get(2)?,
                    flags: PlayerFlags(row.get::<_, i64>(3)? as u64),
                    level: row.get(4)?,
                    experience: row.get::<_, i64>(5)? as u64,
                    health: row.get(6)?,
                    health_max: row.get(7)?,
                    mana: row.get(8)?,
                    mana_max: row.get(9)?,
                    town_id: TownId(row.get(10)?),
                    position: Position {
                        x: row.get(11)?,
                        y: row.get(12)?,
                        z: row.get(13)?,
                    },
                    inventory: Vec::new(),
                    last_login: row.get(14)?,
                    last_logout: row.get(15)?,
                    last_ip: row.get(16)?,
                })
            })
            .optional()?;
        let Some(mut loaded) = row else {
            return Ok(false);
        };
        loaded.name = canonical;
        loaded.inventory = self.load_items_on(&conn, id)?;

        let inventory_len = loaded.inventory.len();
        *record = loaded;
        debug!(
            %id,
            name = %record.name,
            inventory = inventory_len,
            elapsed_us = start.elapsed().as_micros(),
            "Loaded player"
        );
        Ok(true)
    }

    /// Persist a player's attributes and, unless `shallow`, its inventory.
    ///
    /// Attribute and inventory writes run in one transaction: a concurrent
    /// [`Self::load_player`] can never observe a partially written
    /// inventory, and a failed inventory write rolls the attribute write
    /// back.
    ///
    /// Returns `Ok(false)` if the player row no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnloadedRecord`] if `record.id` is `None`,
    /// [`StoreError::Database`] on store faults.
    pub fn save_player(&self, record: &PlayerRecord, shallow: bool) -> Result<bool> {
        let id = record.id.ok_or(StoreError::UnloadedRecord)?;
        let start = Instant::now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let affected = tx
            .prepare_cached(
                "UPDATE players SET
                    group_id = ?2, flags = ?3, level = ?4, experience = ?5,
                    health = ?6, health_max = ?7, mana = ?8, mana_max = ?9,
                    town_id = ?10, pos_x = ?11, pos_y = ?12, pos_z = ?13,
                    last_login = ?14, last_logout = ?15
                 WHERE id = ?1",
            )?
            .execute(params![
                id.0,
                record.group_id,
                record.flags.0 as i64,
                record.level,
                record.experience as i64,
                record.health,
                record.health_max,
                record.mana,
                record.mana_max,
                record.town_id.0,
                record.position.x,
                record.position.y,
                record.position.z,
                record.last_login,
                record.last_logout,
            ])?;
        if affected == 0 {
            return Ok(false);
        }

        if !shallow {
            tx.prepare_cached("DELETE FROM player_items WHERE player_id = ?1")?
                .execute(params![id.0])?;
            let rows = items::flatten(&record.inventory, 1)?;
            let mut insert = tx.prepare_cached(
                "INSERT INTO player_items (player_id, sid, pid, slot, kind, count, attributes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for row in &rows {
                insert.execute(params![
                    id.0, row.sid, row.pid, row.slot, row.kind, row.count, row.attributes
                ])?;
            }
            drop(insert);
        }

        tx.commit()?;
        debug!(
            %id,
            shallow,
            elapsed_us = start.elapsed().as_micros(),
            "Saved player"
        );
        Ok(true)
    }

    fn load_items_on(&self, conn: &Connection, id: PlayerId) -> Result<Vec<ItemBlock>> {
        let mut stmt = conn.prepare_cached(
            "SELECT sid, pid, slot, kind, count, attributes
             FROM player_items WHERE player_id = ?1 ORDER BY sid",
        )?;
        let rows = stmt
            .query_map(params![id.0], |row| {
                Ok(ItemRow {
                    sid: row.get(0)?,
                    pid: row.get(1)?,
                    slot: row.get(2)?,
                    kind: row.get(3)?,
                    count: row.get(4)?,
                    attributes: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        items::build(rows)
    }

    // ------------------------------------------------------------------
    // Deaths & unjust kills
    // ------------------------------------------------------------------

    /// Append the given deaths to a player's death history.
    ///
    /// Idempotent per call: an entry already persisted (same victim, time
    /// and killer name) is silently skipped, so flushing the same
    /// [`crate::DeathList`] twice never produces duplicate rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnloadedRecord`] if `record.id` is `None`,
    /// [`StoreError::Database`] on store faults.
    pub fn add_player_death(&self, record: &PlayerRecord, deaths: &[DeathEntry]) -> Result<bool> {
        let id = record.id.ok_or(StoreError::UnloadedRecord)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut inserted = 0usize;
        for entry in deaths {
            let killer_id = match entry.killer_id {
                Some(killer) => Some(killer),
                None => self
                    .resolve_guid_on(&tx, &entry.killer_name)?
                    .map(|(killer, _)| killer),
            };
            inserted += tx
                .prepare_cached(
                    "INSERT OR IGNORE INTO player_deaths
                        (player_id, time, killer_name, killer_id, unjustified)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?
                .execute(params![
                    id.0,
                    entry.time,
                    entry.killer_name,
                    killer_id.map(|k| k.0),
                    entry.unjustified,
                ])?;
        }

        tx.commit()?;
        debug!(%id, total = deaths.len(), inserted, "Recorded player deaths");
        Ok(true)
    }

    /// Number of unjustified kills committed by `player` within the
    /// trailing `period` window, served from the kill cache when the
    /// cached value is still provably correct.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a refresh hits a store fault;
    /// the previous cached value (if any) stays in place.
    pub fn unjust_kill_count(&self, player: PlayerId, period: UnjustKillPeriod) -> Result<u32> {
        let now = Utc::now().timestamp();
        // Kill-cache lock held across the fetch: concurrent cold reads of
        // the same key collapse into a single store query.
        self.kills
            .lock()
            .count_or_refresh(player, period, now, || {
                let conn = self.conn.lock();
                let since = now - period.window_secs();
                let (count, oldest) = conn
                    .prepare_cached(
                        "SELECT COUNT(*), MIN(time) FROM player_deaths
                         WHERE killer_id = ?1 AND unjustified = 1 AND time > ?2",
                    )?
                    .query_row(params![player.0, since], |row| {
                        Ok((row.get::<_, u32>(0)?, row.get::<_, Option<i64>>(1)?))
                    })?;
                Ok(WindowSample { count, oldest })
            })
    }

    // ------------------------------------------------------------------
    // Mail
    // ------------------------------------------------------------------

    /// Deliver `item` into `recipient_name`'s depot `depot_id`.
    ///
    /// Returns `Ok(false)` if the recipient does not resolve. `actor` is
    /// only recorded in the log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults.
    pub fn send_mail(
        &self,
        actor: Option<PlayerId>,
        recipient_name: &str,
        depot_id: u32,
        item: &Item,
    ) -> Result<bool> {
        let mut conn = self.conn.lock();
        let Some((recipient, _)) = self.resolve_guid_on(&conn, recipient_name)? else {
            return Ok(false);
        };

        let tx = conn.transaction()?;
        let next_sid: i64 = tx
            .prepare_cached(
                "SELECT COALESCE(MAX(sid), 0) + 1 FROM player_depot_items
                 WHERE player_id = ?1 AND depot_id = ?2",
            )?
            .query_row(params![recipient.0, depot_id], |row| row.get(0))?;

        let block = ItemBlock {
            slot: 0,
            item: item.clone(),
        };
        let rows = items::flatten(std::slice::from_ref(&block), next_sid)?;
        let mut insert = tx.prepare_cached(
            "INSERT INTO player_depot_items
                (player_id, depot_id, sid, pid, slot, kind, count, attributes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for row in &rows {
            insert.execute(params![
                recipient.0,
                depot_id,
                row.sid,
                row.pid,
                row.slot,
                row.kind,
                row.count,
                row.attributes
            ])?;
        }
        drop(insert);
        tx.commit()?;

        debug!(
            actor = ?actor,
            %recipient,
            depot_id,
            kind = item.kind,
            items = item.subtree_len(),
            "Mail delivered to depot"
        );
        Ok(true)
    }

    /// Read back a depot's contents in slot order (used by depot loading
    /// and by mail tests).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults.
    pub fn load_depot(&self, player: PlayerId, depot_id: u32) -> Result<Vec<ItemBlock>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT sid, pid, slot, kind, count, attributes
             FROM player_depot_items WHERE player_id = ?1 AND depot_id = ?2 ORDER BY sid",
        )?;
        let rows = stmt
            .query_map(params![player.0, depot_id], |row| {
                Ok(ItemRow {
                    sid: row.get(0)?,
                    pid: row.get(1)?,
                    slot: row.get(2)?,
                    kind: row.get(3)?,
                    count: row.get(4)?,
                    attributes: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        items::build(rows)
    }

    // ------------------------------------------------------------------
    // Lookup family
    // ------------------------------------------------------------------

    /// Resolve a display name (any casing) to a player identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults.
    pub fn guid_by_name(&self, name: &str) -> Result<Option<PlayerId>> {
        let conn = self.conn.lock();
        Ok(self.resolve_guid_on(&conn, name)?.map(|(id, _)| id))
    }

    /// Resolve a player identifier to its canonical display name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults.
    pub fn name_by_guid(&self, id: PlayerId) -> Result<Option<String>> {
        let conn = self.conn.lock();
        self.resolve_name_on(&conn, id)
    }

    /// Account owning the named player.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults.
    pub fn account_by_name(&self, name: &str) -> Result<Option<AccountId>> {
        let conn = self.conn.lock();
        let Some((id, _)) = self.resolve_guid_on(&conn, name)? else {
            return Ok(None);
        };
        let account = conn
            .prepare_cached("SELECT account_id FROM players WHERE id = ?1")?
            .query_row(params![id.0], |row| row.get::<_, u32>(0))
            .optional()?;
        Ok(account.map(AccountId))
    }

    /// World the named player lives on.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults.
    pub fn world_by_name(&self, name: &str) -> Result<Option<WorldId>> {
        let conn = self.conn.lock();
        let Some((id, _)) = self.resolve_guid_on(&conn, name)? else {
            return Ok(None);
        };
        let world = conn
            .prepare_cached("SELECT world_id FROM players WHERE id = ?1")?
            .query_row(params![id.0], |row| row.get::<_, u32>(0))
            .optional()?;
        Ok(world.map(WorldId))
    }

    /// Resolve a guild name (any casing) to its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults.
    pub fn guild_id_by_name(&self, guild_name: &str) -> Result<Option<GuildId>> {
        let conn = self.conn.lock();
        let id = conn
            .prepare_cached("SELECT id FROM guilds WHERE name = ?1")?
            .query_row(params![guild_name], |row| row.get::<_, u32>(0))
            .optional()?;
        Ok(id.map(GuildId))
    }

    /// The world's default town, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults.
    pub fn default_town(&self) -> Result<Option<(TownId, String)>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT id, name FROM towns WHERE is_default = 1 LIMIT 1")?
            .query_row([], |row| Ok((TownId(row.get(0)?), row.get::<_, String>(1)?)))
            .optional()?;
        Ok(row)
    }

    /// Whether a player with that name exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults.
    pub fn player_exists(&self, name: &str) -> Result<bool> {
        Ok(self.guid_by_name(name)?.is_some())
    }

    /// Last IP the player connected from.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults.
    pub fn last_ip(&self, id: PlayerId) -> Result<Option<u32>> {
        let conn = self.conn.lock();
        let ip = conn
            .prepare_cached("SELECT last_ip FROM players WHERE id = ?1")?
            .query_row(params![id.0], |row| row.get::<_, u32>(0))
            .optional()?;
        Ok(ip)
    }

    /// Whether the player's persisted flag bits contain `flag`.
    /// `Ok(false)` when the player does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults.
    pub fn has_flag(&self, flag: PlayerFlag, id: PlayerId) -> Result<bool> {
        let conn = self.conn.lock();
        let flags = conn
            .prepare_cached("SELECT flags FROM players WHERE id = ?1")?
            .query_row(params![id.0], |row| row.get::<_, i64>(0))
            .optional()?;
        Ok(flags.is_some_and(|bits| PlayerFlags(bits as u64).contains(flag)))
    }

    // ------------------------------------------------------------------
    // Session / online bookkeeping
    // ------------------------------------------------------------------

    /// Write the player's login timestamp and IP and mark them online.
    /// Fire-and-forget: not retried here, failure is the caller's to log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnloadedRecord`] if `record.id` is `None`,
    /// [`StoreError::Database`] on store faults.
    pub fn update_login_info(&self, record: &PlayerRecord) -> Result<()> {
        let id = record.id.ok_or(StoreError::UnloadedRecord)?;
        let conn = self.conn.lock();
        conn.prepare_cached(
            "UPDATE players SET last_login = ?2, last_ip = ?3, online = 1 WHERE id = ?1",
        )?
        .execute(params![id.0, record.last_login, record.last_ip])?;
        Ok(())
    }

    /// Write the player's logout timestamp and mark them offline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnloadedRecord`] if `record.id` is `None`,
    /// [`StoreError::Database`] on store faults.
    pub fn update_logout_info(&self, record: &PlayerRecord) -> Result<()> {
        let id = record.id.ok_or(StoreError::UnloadedRecord)?;
        let conn = self.conn.lock();
        conn.prepare_cached("UPDATE players SET last_logout = ?2, online = 0 WHERE id = ?1")?
            .execute(params![id.0, record.last_logout])?;
        Ok(())
    }

    /// Whether any character on the account is currently marked online.
    /// Online state changes too frequently to cache.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults.
    pub fn is_player_online_by_account(&self, account: AccountId) -> Result<bool> {
        let conn = self.conn.lock();
        let online: bool = conn
            .prepare_cached(
                "SELECT EXISTS(SELECT 1 FROM players WHERE account_id = ?1 AND online = 1)",
            )?
            .query_row(params![account.0], |row| row.get(0))?;
        Ok(online)
    }

    /// Clear every online marker; run once at server startup to recover
    /// from a crash that left players flagged online. Returns the number
    /// of rows cleared.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults.
    pub fn clean_online_info(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let cleared = conn.execute("UPDATE players SET online = 0 WHERE online = 1", [])?;
        if cleared > 0 {
            info!(cleared, "Cleared stale online markers");
        }
        Ok(cleared)
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a new player row with default attributes. Returns `None`
    /// when the name is already taken (case-insensitively).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on store faults.
    pub fn create_player(
        &self,
        name: &str,
        account: AccountId,
        world: WorldId,
    ) -> Result<Option<PlayerId>> {
        let conn = self.conn.lock();
        let inserted = conn
            .prepare_cached(
                "INSERT OR IGNORE INTO players (name, account_id, world_id) VALUES (?1, ?2, ?3)",
            )?
            .execute(params![name, account.0, world.0])?;
        if inserted == 0 {
            return Ok(None);
        }
        let id = PlayerId(u32::try_from(conn.last_insert_rowid()).unwrap_or(u32::MAX));
        self.names.lock().insert(id, name);
        info!(%id, name, "Created player");
        Ok(Some(id))
    }

    // ------------------------------------------------------------------
    // Cache plumbing
    // ------------------------------------------------------------------

    /// Name → identifier, read-through. Caller holds the connection lock
    /// and passes the connection (or an open transaction) in, so cache
    /// helpers never re-acquire it.
    fn resolve_guid_on(
        &self,
        conn: &Connection,
        name: &str,
    ) -> Result<Option<(PlayerId, String)>> {
        {
            let cache = self.names.lock();
            if let Some(id) = cache.get_id(name) {
                if let Some(canonical) = cache.get_name(id) {
                    return Ok(Some((id, canonical.to_string())));
                }
            }
        }

        let row = conn
            .prepare_cached("SELECT id, name FROM players WHERE name = ?1")?
            .query_row(params![name], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;
        match row {
            Some((raw_id, canonical)) => {
                let id = PlayerId(raw_id);
                self.names.lock().insert(id, &canonical);
                debug!(name, %id, "Resolved name via store");
                Ok(Some((id, canonical)))
            }
            // A genuinely unknown name is not cached: nonexistence is not
            // provable to stay true without a negative-cache policy.
            None => Ok(None),
        }
    }

    /// Identifier → name, read-through.
    fn resolve_name_on(&self, conn: &Connection, id: PlayerId) -> Result<Option<String>> {
        if let Some(name) = self.names.lock().get_name(id) {
            return Ok(Some(name.to_string()));
        }

        let name = conn
            .prepare_cached("SELECT name FROM players WHERE id = ?1")?
            .query_row(params![id.0], |row| row.get::<_, String>(0))
            .optional()?;
        if let Some(ref canonical) = name {
            self.names.lock().insert(id, canonical);
            debug!(%id, name = %canonical, "Resolved identifier via store");
        }
        Ok(name)
    }

    /// Number of name pairs currently cached (diagnostics).
    #[must_use]
    pub fn cached_names(&self) -> usize {
        self.names.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::ItemAttributes;

    fn test_store() -> PlayerStore {
        PlayerStore::open_in_memory(&StoreConfig::default()).expect("open")
    }

    fn create(store: &PlayerStore, name: &str) -> PlayerId {
        store
            .create_player(name, AccountId(1), WorldId(0))
            .expect("create")
            .expect("name free")
    }

    fn sample_inventory() -> Vec<ItemBlock> {
        let mut attributes = ItemAttributes::new();
        attributes.insert("text".into(), serde_json::json!("dear diary"));
        vec![
            ItemBlock {
                slot: 3,
                item: Item {
                    kind: 100,
                    count: 1,
                    attributes: ItemAttributes::new(),
                    contents: vec![
                        Item::new(200, 5),
                        Item {
                            kind: 300,
                            count: 1,
                            attributes,
                            contents: Vec::new(),
                        },
                    ],
                },
            },
            ItemBlock {
                slot: 6,
                item: Item::new(400, 1),
            },
        ]
    }

    fn death(time: i64, killer: &str, unjustified: bool) -> DeathEntry {
        DeathEntry {
            time,
            killer_name: killer.to_string(),
            killer_id: None,
            unjustified,
        }
    }

    #[test]
    fn create_and_resolve_names() {
        let store = test_store();
        let id = create(&store, "Sir Lancelot");

        assert_eq!(store.guid_by_name("sir lancelot").expect("lookup"), Some(id));
        assert_eq!(store.guid_by_name("SIR LANCELOT").expect("lookup"), Some(id));
        assert_eq!(
            store.name_by_guid(id).expect("lookup").as_deref(),
            Some("Sir Lancelot")
        );
        assert_eq!(store.guid_by_name("nobody").expect("lookup"), None);
        assert_eq!(store.cached_names(), 1);
    }

    #[test]
    fn non_ascii_lookups_agree_between_cache_and_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("players.db");
        let config = StoreConfig::default();

        let warm = PlayerStore::open(&db_path, &config).expect("open");
        let asa = warm
            .create_player("Åsa", AccountId(1), WorldId(0))
            .expect("create")
            .expect("name free");

        // ASCII case variants match through the warm cache.
        assert_eq!(warm.guid_by_name("ÅSA").expect("lookup"), Some(asa));
        let warm_variant = warm.player_exists("åsa").expect("exists");

        // A fresh handle on the same file has cold caches; every lookup
        // must come out the same as on the warm one.
        let cold = PlayerStore::open(&db_path, &config).expect("reopen");
        assert_eq!(cold.guid_by_name("ÅSA").expect("lookup"), Some(asa));
        let cold_variant = cold.player_exists("åsa").expect("exists");
        assert_eq!(
            warm_variant, cold_variant,
            "lookup result must not depend on cache warmth"
        );

        // NOCASE folds ASCII only, so the Unicode case variant is a
        // distinct name: absent above, creatable as its own player now.
        assert!(!warm_variant);
        let lower = cold
            .create_player("åsa", AccountId(2), WorldId(0))
            .expect("create")
            .expect("distinct name");
        assert_ne!(lower, asa);
        assert_eq!(cold.guid_by_name("åsa").expect("lookup"), Some(lower));
        assert_eq!(cold.guid_by_name("Åsa").expect("lookup"), Some(asa));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let store = test_store();
        create(&store, "Alice");
        let taken = store
            .create_player("alice", AccountId(2), WorldId(0))
            .expect("create");
        assert!(taken.is_none());
    }

    #[test]
    fn load_unknown_player_returns_false() {
        let store = test_store();
        let mut record = PlayerRecord::default();
        assert!(!store.load_player(&mut record, "Ghost", false).expect("load"));
        assert!(record.id.is_none());
    }

    #[test]
    fn preload_populates_identity_only() {
        let store = test_store();
        let id = create(&store, "Alice");

        let mut record = PlayerRecord::default();
        assert!(store.load_player(&mut record, "alice", true).expect("load"));
        assert_eq!(record.id, Some(id));
        assert_eq!(record.name, "Alice");
        assert_eq!(record.account_id, AccountId(1));
        assert!(record.inventory.is_empty());
    }

    #[test]
    fn save_and_reload_round_trips_inventory() {
        let store = test_store();
        let id = create(&store, "Alice");

        let mut record = PlayerRecord::default();
        assert!(store.load_player(&mut record, "Alice", false).expect("load"));
        record.level = 12;
        record.experience = 34_567;
        record.health = 80;
        record.flags = PlayerFlags::default().with(PlayerFlag::SpecialVip);
        record.inventory = sample_inventory();
        assert!(store.save_player(&record, false).expect("save"));

        let mut fresh = PlayerRecord::default();
        assert!(store.load_player(&mut fresh, "Alice", false).expect("reload"));
        assert_eq!(fresh.id, Some(id));
        assert_eq!(fresh.level, 12);
        assert_eq!(fresh.experience, 34_567);
        assert_eq!(fresh.inventory, record.inventory);
        assert!(fresh.flags.contains(PlayerFlag::SpecialVip));
    }

    #[test]
    fn shallow_save_leaves_inventory_untouched() {
        let store = test_store();
        create(&store, "Alice");

        let mut record = PlayerRecord::default();
        store.load_player(&mut record, "Alice", false).expect("load");
        record.inventory = sample_inventory();
        store.save_player(&record, false).expect("save full");

        // A shallow save with a different in-memory inventory must not
        // touch the stored one.
        record.inventory.clear();
        record.level = 13;
        store.save_player(&record, true).expect("save shallow");

        let mut fresh = PlayerRecord::default();
        store.load_player(&mut fresh, "Alice", false).expect("reload");
        assert_eq!(fresh.level, 13);
        assert_eq!(fresh.inventory, sample_inventory());
    }

    #[test]
    fn save_without_identifier_is_an_error() {
        let store = test_store();
        let record = PlayerRecord::default();
        assert!(matches!(
            store.save_player(&record, false),
            Err(StoreError::UnloadedRecord)
        ));
    }

    #[test]
    fn death_flush_is_idempotent() {
        let store = test_store();
        create(&store, "Victim");
        let killer = create(&store, "Killer");

        let mut victim = PlayerRecord::default();
        store.load_player(&mut victim, "Victim", true).expect("load");

        let deaths = vec![
            death(1000, "Killer", true),
            death(2000, "a wild troll", false),
        ];
        store.add_player_death(&victim, &deaths).expect("first flush");
        store.add_player_death(&victim, &deaths).expect("second flush");

        let rows: i64 = store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM player_deaths", [], |row| row.get(0))
            .expect("count");
        assert_eq!(rows, 2, "second flush must not duplicate rows");

        // The player killer was resolved; the creature was not.
        let resolved: Option<u32> = store
            .conn
            .lock()
            .query_row(
                "SELECT killer_id FROM player_deaths WHERE time = 1000",
                [],
                |row| row.get(0),
            )
            .expect("row");
        assert_eq!(resolved, Some(killer.0));
    }

    #[test]
    fn unjust_kill_counts_per_window() {
        let store = test_store();
        create(&store, "Victim");
        let killer = create(&store, "Killer");
        let now = Utc::now().timestamp();

        let mut victim = PlayerRecord::default();
        store.load_player(&mut victim, "Victim", true).expect("load");
        store
            .add_player_death(
                &victim,
                &[
                    death(now - 3600, "Killer", true),           // within a day
                    death(now - 2 * 86_400, "Killer", true),     // within a week
                    death(now - 10 * 86_400, "Killer", true),    // within a month
                    death(now - 5000, "Killer", false),          // justified, never counted
                ],
            )
            .expect("seed");

        assert_eq!(store.unjust_kill_count(killer, UnjustKillPeriod::Day).expect("day"), 1);
        assert_eq!(store.unjust_kill_count(killer, UnjustKillPeriod::Week).expect("week"), 2);
        assert_eq!(store.unjust_kill_count(killer, UnjustKillPeriod::Month).expect("month"), 3);

        // Served from cache on repeat.
        assert_eq!(store.unjust_kill_count(killer, UnjustKillPeriod::Day).expect("day"), 1);
        let entry = store
            .kills
            .lock()
            .peek(killer, UnjustKillPeriod::Day)
            .expect("cached");
        assert_eq!(entry.expire_time, (now - 3600) + 86_400);
    }

    #[test]
    fn zero_kill_count_is_cached() {
        let store = test_store();
        let pacifist = create(&store, "Pacifist");

        assert_eq!(
            store.unjust_kill_count(pacifist, UnjustKillPeriod::Month).expect("count"),
            0
        );
        let entry = store
            .kills
            .lock()
            .peek(pacifist, UnjustKillPeriod::Month)
            .expect("cached");
        assert_eq!(entry.count, 0);
        assert!(entry.expire_time > entry.query_time);
    }

    #[test]
    fn mail_lands_in_recipient_depot() {
        let store = test_store();
        let alice = create(&store, "Alice");

        let mut parcel = Item::new(500, 1);
        parcel.contents.push(Item::new(600, 10));
        assert!(store.send_mail(None, "alice", 1, &parcel).expect("send"));

        let depot = store.load_depot(alice, 1).expect("depot");
        assert_eq!(depot.len(), 1);
        assert_eq!(depot[0].item, parcel);

        // A second delivery appends rather than overwrites.
        assert!(store.send_mail(None, "Alice", 1, &Item::new(700, 1)).expect("send"));
        assert_eq!(store.load_depot(alice, 1).expect("depot").len(), 2);
        // Other depots are unaffected.
        assert!(store.load_depot(alice, 2).expect("depot").is_empty());
    }

    #[test]
    fn mail_to_unknown_recipient_fails_cleanly() {
        let store = test_store();
        assert!(!store.send_mail(None, "Ghost", 1, &Item::new(500, 1)).expect("send"));
    }

    #[test]
    fn lookup_family() {
        let store = test_store();
        let id = create(&store, "Alice");
        {
            let conn = store.conn.lock();
            conn.execute("INSERT INTO guilds (name) VALUES ('Crimson Hand')", [])
                .expect("guild");
            conn.execute(
                "INSERT INTO towns (name, is_default) VALUES ('Rookville', 1)",
                [],
            )
            .expect("town");
        }

        assert_eq!(store.account_by_name("alice").expect("account"), Some(AccountId(1)));
        assert_eq!(store.world_by_name("Alice").expect("world"), Some(WorldId(0)));
        assert_eq!(store.account_by_name("Ghost").expect("account"), None);
        assert!(store.player_exists("ALICE").expect("exists"));
        assert!(!store.player_exists("Ghost").expect("exists"));
        assert_eq!(store.last_ip(id).expect("ip"), Some(0));

        let guild = store.guild_id_by_name("crimson hand").expect("guild");
        assert!(guild.is_some());
        assert_eq!(store.guild_id_by_name("Azure Hand").expect("guild"), None);

        let (_, town_name) = store.default_town().expect("town").expect("configured");
        assert_eq!(town_name, "Rookville");
    }

    #[test]
    fn has_flag_reads_persisted_bits() {
        let store = test_store();
        let id = create(&store, "Alice");

        let mut record = PlayerRecord::default();
        store.load_player(&mut record, "Alice", false).expect("load");
        record.flags = PlayerFlags::default().with(PlayerFlag::CannotAttackPlayer);
        store.save_player(&record, true).expect("save");

        assert!(store.has_flag(PlayerFlag::CannotAttackPlayer, id).expect("flag"));
        assert!(!store.has_flag(PlayerFlag::SpecialVip, id).expect("flag"));
        assert!(!store.has_flag(PlayerFlag::SpecialVip, PlayerId(999)).expect("flag"));
    }

    #[test]
    fn online_bookkeeping_lifecycle() {
        let store = test_store();
        create(&store, "Alice");

        let mut record = PlayerRecord::default();
        store.load_player(&mut record, "Alice", false).expect("load");
        assert!(!store.is_player_online_by_account(AccountId(1)).expect("online"));

        record.last_login = 1_000_000;
        record.last_ip = 0x0100_007f;
        store.update_login_info(&record).expect("login");
        assert!(store.is_player_online_by_account(AccountId(1)).expect("online"));

        record.last_logout = 1_000_100;
        store.update_logout_info(&record).expect("logout");
        assert!(!store.is_player_online_by_account(AccountId(1)).expect("online"));

        // Simulate a crash that left the marker set, then clean up.
        store.update_login_info(&record).expect("login");
        assert_eq!(store.clean_online_info().expect("clean"), 1);
        assert!(!store.is_player_online_by_account(AccountId(1)).expect("online"));
    }

    #[test]
    fn facade_is_shareable_across_threads() {
        let store = test_store();
        create(&store, "Victim");
        let killer = create(&store, "Killer");

        let mut victim = PlayerRecord::default();
        store.load_player(&mut victim, "Victim", true).expect("load");
        let now = Utc::now().timestamp();
        store
            .add_player_death(&victim, &[death(now - 60, "Killer", true)])
            .expect("seed");

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        let count = store
                            .unjust_kill_count(killer, UnjustKillPeriod::Day)
                            .expect("count");
                        assert_eq!(count, 1);
                        assert!(store.player_exists("victim").expect("exists"));
                    }
                });
            }
        });
    }
}
