//! SQL layouts of the source database the engine reads and the unified
//! database it publishes.

/// Expected source layout. The engine only reads these tables; `init-source`
/// creates them empty for new deployments and tests.
pub const SOURCE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS plays (
    id INTEGER PRIMARY KEY,
    track_id TEXT,
    track_name TEXT,
    artist_id TEXT,
    artist_name TEXT,
    album_id TEXT,
    album_name TEXT,
    album_type TEXT,
    duration_ms INTEGER,
    played_at TEXT
);
CREATE TABLE IF NOT EXISTS spotify_play_history (
    id INTEGER PRIMARY KEY,
    track_id TEXT,
    track_name TEXT,
    artist_id TEXT,
    artist_name TEXT,
    album_id TEXT,
    album_name TEXT,
    album_type TEXT,
    duration_ms INTEGER,
    played_at TEXT
);
CREATE TABLE IF NOT EXISTS apple_music_play_history (
    id INTEGER PRIMARY KEY,
    track_id TEXT,
    track_name TEXT,
    artist_id TEXT,
    artist_name TEXT,
    album_id TEXT,
    album_name TEXT,
    album_type TEXT,
    duration_ms INTEGER,
    played_at TEXT
);
CREATE TABLE IF NOT EXISTS track_id_equivalents (
    alias_track_id TEXT,
    canonical_track_id TEXT
);
CREATE TABLE IF NOT EXISTS albums (
    id TEXT PRIMARY KEY,
    name TEXT,
    artist TEXT,
    artist_id TEXT,
    album_type TEXT,
    album_image_url TEXT,
    release_date TEXT,
    is_saved INTEGER DEFAULT 1
);
CREATE TABLE IF NOT EXISTS tracks (
    id TEXT PRIMARY KEY,
    name TEXT,
    artist TEXT,
    album_id TEXT,
    track_number INTEGER,
    disc_number INTEGER,
    added_at TEXT,
    duration_ms INTEGER,
    popularity INTEGER
);
CREATE TABLE IF NOT EXISTS liked_tracks (
    track_id TEXT PRIMARY KEY,
    track_name TEXT,
    track_artist TEXT,
    artist_id TEXT,
    album_id TEXT,
    added_at TEXT,
    liked_at TEXT,
    duration_ms INTEGER,
    popularity INTEGER
);
CREATE TABLE IF NOT EXISTS track_availability (
    track_id TEXT PRIMARY KEY,
    is_playable INTEGER
);
CREATE TABLE IF NOT EXISTS artists (
    id TEXT PRIMARY KEY,
    name TEXT,
    genres TEXT,
    image_url TEXT
);
CREATE TABLE IF NOT EXISTS excluded_tracks (
    track_id TEXT PRIMARY KEY
);
";

/// Published dataset. One row per canonical track id.
pub const UNIFIED_SCHEMA: &str = "
CREATE TABLE unified_tracks (
    track_id TEXT PRIMARY KEY,
    source_track_id TEXT NOT NULL,
    name TEXT,
    artist TEXT,
    artist_id TEXT,
    album_id TEXT,
    album_name TEXT,
    album_type TEXT,
    album_image_url TEXT,
    release_date TEXT,
    genres TEXT,
    artist_image TEXT,
    track_number INTEGER,
    disc_number INTEGER NOT NULL,
    duration_ms INTEGER,
    popularity INTEGER,
    provenance TEXT NOT NULL,
    is_liked INTEGER NOT NULL,
    is_playable INTEGER,
    is_excluded INTEGER NOT NULL,
    liked_at TEXT,
    source_added_at TEXT,
    added_at TEXT,
    library_play_count INTEGER NOT NULL,
    library_first_played_at TEXT,
    library_last_played_at TEXT,
    resume_count INTEGER NOT NULL,
    skip_count INTEGER NOT NULL,
    fuzzy_play_count INTEGER NOT NULL,
    fuzzy_first_played_at TEXT,
    fuzzy_last_played_at TEXT,
    play_count INTEGER NOT NULL,
    first_played_at TEXT,
    last_played_at TEXT
);
";

/// Indexes built after the bulk insert.
pub const UNIFIED_INDEXES: &str = "
CREATE INDEX idx_unified_tracks_artist ON unified_tracks(artist);
CREATE INDEX idx_unified_tracks_album_id ON unified_tracks(album_id);
CREATE INDEX idx_unified_tracks_last_played ON unified_tracks(last_played_at);
CREATE INDEX idx_unified_tracks_play_count ON unified_tracks(play_count);
CREATE INDEX idx_unified_tracks_browse_order ON unified_tracks(artist, album_id, disc_number, track_number);
";
