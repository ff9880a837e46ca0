// Tables are created idempotently on every start; there is no separate migration step.

pub(super) const STATEMENTS: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS scraping_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        search_params TEXT NOT NULL,
        total_count INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS listings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        make TEXT,
        model TEXT,
        year INTEGER,
        mileage TEXT,
        location TEXT,
        price TEXT NOT NULL,
        registration_number TEXT,
        url TEXT NOT NULL,
        color TEXT,
        drive_type TEXT,
        gearbox TEXT,
        body_type TEXT,
        first_seen TEXT NOT NULL,
        last_seen TEXT NOT NULL,
        run_id INTEGER REFERENCES scraping_runs (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS price_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        listing_id INTEGER NOT NULL REFERENCES listings (id),
        price TEXT NOT NULL,
        timestamp TEXT NOT NULL
    )
    "#,
    // one row per registration number; NULL means "identify by url"
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_listings_registration
        ON listings (registration_number)
        WHERE registration_number IS NOT NULL
    "#,
    "CREATE INDEX IF NOT EXISTS idx_listings_url ON listings (url)",
    "CREATE INDEX IF NOT EXISTS idx_price_history_listing ON price_history (listing_id, timestamp)",
];
