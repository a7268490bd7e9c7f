pub const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;
";

pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS files (
        file_id         INTEGER PRIMARY KEY AUTOINCREMENT,
        original_path   TEXT NOT NULL,
        file_size       INTEGER NOT NULL,
        chunk_count     INTEGER NOT NULL,
        encryption_key  BLOB NOT NULL,
        created_at      TEXT NOT NULL,
        status          TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS chunks (
        chunk_id        INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id         INTEGER NOT NULL,
        chunk_index     INTEGER NOT NULL,
        chunk_size      INTEGER NOT NULL,
        backend_name    TEXT NOT NULL,
        remote_id       TEXT NOT NULL,
        checksum        TEXT NOT NULL,
        status          TEXT NOT NULL,

        UNIQUE (file_id, chunk_index),
        FOREIGN KEY (file_id) REFERENCES files(file_id)
    );

    CREATE INDEX IF NOT EXISTS idx_chunks_file
        ON chunks(file_id, chunk_index);
";

pub const FILE_COLUMNS: &str =
    "file_id, original_path, file_size, chunk_count, encryption_key, created_at, status";

pub const CHUNK_COLUMNS: &str =
    "chunk_id, file_id, chunk_index, chunk_size, backend_name, remote_id, checksum, status";
