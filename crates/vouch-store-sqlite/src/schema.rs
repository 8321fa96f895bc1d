//! SQL schema for the vouch SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS subscriptions (
    id                       TEXT PRIMARY KEY,
    email                    TEXT,
    active                   INTEGER NOT NULL DEFAULT 0,
    tier                     TEXT NOT NULL,
    source                   TEXT NOT NULL,
    provider_subscription_id TEXT,
    provider_customer_id     TEXT,
    current_period_end       TEXT,            -- RFC 3339 or NULL
    trial_end                TEXT,
    notes                    TEXT,
    created_at               TEXT NOT NULL,   -- RFC 3339 UTC
    updated_at               TEXT NOT NULL
);

-- Secondary index from email to subscription ids. A real table rather than
-- a derived view: independent writers can leave it out of step with the
-- primary records, and the store heals it on read.
CREATE TABLE IF NOT EXISTS email_index (
    email           TEXT NOT NULL,
    subscription_id TEXT NOT NULL,
    PRIMARY KEY (email, subscription_id)
);

CREATE TABLE IF NOT EXISTS users (
    email             TEXT PRIMARY KEY,
    name              TEXT,
    active            INTEGER NOT NULL DEFAULT 1,
    subscription_id   TEXT,
    subscription_tier TEXT NOT NULL,
    verification      TEXT,               -- JSON Verification or NULL
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS usage (
    identifier    TEXT NOT NULL,
    month         TEXT NOT NULL,           -- YYYY-MM (UTC)
    message_count INTEGER NOT NULL DEFAULT 0,
    details       TEXT NOT NULL DEFAULT '[]',  -- JSON detail ring buffer
    PRIMARY KEY (identifier, month)
);

CREATE INDEX IF NOT EXISTS subscriptions_email_idx
    ON subscriptions(email);
CREATE INDEX IF NOT EXISTS subscriptions_provider_idx
    ON subscriptions(provider_subscription_id);

PRAGMA user_version = 1;
";
