pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS query_sets (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS queries (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  set_id INTEGER NOT NULL REFERENCES query_sets(id),
  sequence_number INTEGER NOT NULL,
  name TEXT,
  sql_text TEXT NOT NULL,
  content_hash TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  set_id INTEGER NOT NULL REFERENCES query_sets(id),
  user_id INTEGER NOT NULL,
  label TEXT NOT NULL,
  iteration_count INTEGER NOT NULL,
  concurrency_limit INTEGER NOT NULL,
  metrics_level TEXT NOT NULL,
  status TEXT NOT NULL,
  created_at TEXT NOT NULL,
  started_at TEXT,
  completed_at TEXT,
  total_executions INTEGER NOT NULL DEFAULT 0,
  successful_executions INTEGER NOT NULL DEFAULT 0,
  failed_executions INTEGER NOT NULL DEFAULT 0,
  avg_duration_ms REAL
);

CREATE TABLE IF NOT EXISTS executions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  query_id INTEGER NOT NULL REFERENCES queries(id),
  iteration_number INTEGER NOT NULL,
  status TEXT NOT NULL,
  started_at TEXT NOT NULL,
  completed_at TEXT,
  duration_ms INTEGER,
  rows_affected INTEGER,
  error_message TEXT
);

CREATE TABLE IF NOT EXISTS comparisons (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  baseline_run_id INTEGER NOT NULL REFERENCES runs(id),
  comparison_run_id INTEGER NOT NULL REFERENCES runs(id),
  deviation_threshold REAL NOT NULL,
  created_at TEXT NOT NULL,
  queries_compared INTEGER NOT NULL DEFAULT 0,
  queries_improved INTEGER NOT NULL DEFAULT 0,
  queries_degraded INTEGER NOT NULL DEFAULT 0,
  queries_unchanged INTEGER NOT NULL DEFAULT 0,
  new_failures INTEGER NOT NULL DEFAULT 0,
  resolved INTEGER NOT NULL DEFAULT 0,
  overall_percent_change REAL
);

CREATE TABLE IF NOT EXISTS comparison_details (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  comparison_id INTEGER NOT NULL REFERENCES comparisons(id),
  query_id INTEGER NOT NULL REFERENCES queries(id),
  baseline_avg_ms REAL,
  baseline_min_ms REAL,
  baseline_max_ms REAL,
  comparison_avg_ms REAL,
  comparison_min_ms REAL,
  comparison_max_ms REAL,
  percent_change REAL,
  classification TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queries_set ON queries(set_id, sequence_number);
CREATE INDEX IF NOT EXISTS idx_executions_run ON executions(run_id);
CREATE INDEX IF NOT EXISTS idx_executions_run_query ON executions(run_id, query_id);
CREATE INDEX IF NOT EXISTS idx_details_comparison ON comparison_details(comparison_id);
"#;
