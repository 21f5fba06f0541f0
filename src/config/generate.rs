pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# PODLOG CONFIGURATION
# =============================================================================
# podlog follows the logs of every pod in a namespace, puts all records in one
# total order and serves them to the log viewer.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/podlog/config.yml
#   3. /etc/podlog/config.yml
#
# A value may reference an environment variable by writing `$env` followed by
# the variable name in braces; it is substituted when the file is loaded.

# =============================================================================
# STORAGE
# =============================================================================
# Records are kept in memory in generations. A full generation is retired and,
# after a short cooldown, flushed to an immutable segment file under `path`.

storage:
  path: ~/.local/share/podlog/segments

  # Remove existing segments on start. When off, old segments stay queryable
  # and new sequence ids continue after the last stored one.
  clear_on_start: true

  # Records per in-memory generation before it is retired
  max_memory_generation: 7000

  # Minimal time a retired generation stays in memory before it is written
  min_retirement: 1s

# =============================================================================
# INGEST
# =============================================================================
# Pods whose log can't be streamed yet (still starting) are retried every
# `retry_delay` until they are older than `give_up_after`, then ignored.

ingest:
  retry_delay: 3s
  give_up_after: 5m

# =============================================================================
# CLUSTER
# =============================================================================
# Kubernetes API access. The defaults below work from inside a pod with a
# service account. For local use run `kubectl proxy` and point api_server at
# http://127.0.0.1:8001 without a token.

cluster:
  api_server: https://kubernetes.default.svc
  namespace: default
  token_file: /var/run/secrets/kubernetes.io/serviceaccount/token
  ca_file: /var/run/secrets/kubernetes.io/serviceaccount/ca.crt

  # Skip TLS certificate verification (development clusters only)
  insecure: false

  # How often the pod list is polled for new pods
  poll_interval: 1s

  # Pods whose name starts with one of these are not collected
  ignore_prefixes: []

# =============================================================================
# WEB
# =============================================================================
# GET /api/events?sid=<sid>&time=<epoch-millis> streams the stored records.

web:
  listen: 127.0.0.1:8080

  # Directory with the log viewer bundle, served at /
  # static_dir: /usr/share/podlog/viewer
"#
    .to_string()
}
