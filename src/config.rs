use crate::services::{
    registry::FieldDefinition,
    sizes::{DEFAULT_PART_SIZE, GIB, KIB, MIB},
    storage::{BackendKind, StorageConfig},
};
use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use std::{env, fmt};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageConfig,
    pub signing_secret: String,
    pub upload_prefix: String,
    pub part_size: u64,
    pub fields: Vec<FieldDefinition>,
    pub skip_storage_check: bool,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage", &self.storage)
            .field("upload_prefix", &self.upload_prefix)
            .field("part_size", &self.part_size)
            .field("fields", &self.fields)
            .field("skip_storage_check", &self.skip_storage_check)
            .finish_non_exhaustive()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Direct-to-S3 multipart upload service")]
pub struct Args {
    /// Host to bind to (overrides DIRECT_UPLOAD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DIRECT_UPLOAD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend, `s3` or `minio` (overrides DIRECT_UPLOAD_BACKEND)
    #[arg(long)]
    pub backend: Option<String>,

    /// Bucket uploads are stored in (overrides DIRECT_UPLOAD_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Store region (overrides DIRECT_UPLOAD_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Store endpoint used by the server (overrides DIRECT_UPLOAD_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Store endpoint put into browser-facing URLs (overrides DIRECT_UPLOAD_PUBLIC_ENDPOINT)
    #[arg(long)]
    pub public_endpoint: Option<String>,

    /// Canned ACL for new objects, S3 only (overrides DIRECT_UPLOAD_ACL)
    #[arg(long)]
    pub acl: Option<String>,

    /// Prefix of every generated object key (overrides DIRECT_UPLOAD_PREFIX)
    #[arg(long)]
    pub upload_prefix: Option<String>,

    /// Preferred part size, e.g. `67108864` or `64MiB` (overrides DIRECT_UPLOAD_PART_SIZE)
    #[arg(long)]
    pub part_size: Option<String>,

    /// Upload field as `id=namespace`; repeatable (overrides DIRECT_UPLOAD_FIELDS)
    #[arg(long = "field")]
    pub fields: Vec<String>,

    /// Start even if the storage self-test fails
    #[arg(long)]
    pub skip_storage_check: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    ///
    /// Secrets (store credentials, signing secret) are read from the
    /// environment only, so they never show up in process listings.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        Self::resolve(Args::parse(), |key| env::var(key).ok())
    }

    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| env(key).filter(|value| !value.is_empty());

        // --- Environment fallback ---
        let env_port = match var("DIRECT_UPLOAD_PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing DIRECT_UPLOAD_PORT value `{}`", value))?,
            None => 3000,
        };
        let backend = args
            .backend
            .or_else(|| var("DIRECT_UPLOAD_BACKEND"))
            .unwrap_or_else(|| "s3".into());
        let backend = backend
            .parse::<BackendKind>()
            .context("selecting storage backend")?;

        let signing_secret = var("DIRECT_UPLOAD_SIGNING_SECRET")
            .ok_or_else(|| anyhow!("DIRECT_UPLOAD_SIGNING_SECRET must be set"))?;

        let part_size = match args.part_size.or_else(|| var("DIRECT_UPLOAD_PART_SIZE")) {
            Some(value) => parse_size(&value)
                .with_context(|| format!("parsing part size `{}`", value))?,
            None => DEFAULT_PART_SIZE,
        };

        let field_specs: Vec<String> = if args.fields.is_empty() {
            var("DIRECT_UPLOAD_FIELDS")
                .map(|value| value.split(',').map(str::to_string).collect())
                .unwrap_or_default()
        } else {
            args.fields
        };
        let fields = field_specs
            .iter()
            .map(|spec| spec.trim())
            .filter(|spec| !spec.is_empty())
            .map(parse_field)
            .collect::<Result<Vec<_>>>()?;

        // --- Merge ---
        Ok(Self {
            host: args
                .host
                .or_else(|| var("DIRECT_UPLOAD_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.unwrap_or(env_port),
            storage: StorageConfig {
                backend,
                bucket: args
                    .bucket
                    .or_else(|| var("DIRECT_UPLOAD_BUCKET"))
                    .unwrap_or_default(),
                region: args.region.or_else(|| var("DIRECT_UPLOAD_REGION")),
                endpoint: args.endpoint.or_else(|| var("DIRECT_UPLOAD_ENDPOINT")),
                public_endpoint: args
                    .public_endpoint
                    .or_else(|| var("DIRECT_UPLOAD_PUBLIC_ENDPOINT")),
                access_key: var("DIRECT_UPLOAD_ACCESS_KEY")
                    .or_else(|| var("AWS_ACCESS_KEY_ID"))
                    .unwrap_or_default(),
                secret_key: var("DIRECT_UPLOAD_SECRET_KEY")
                    .or_else(|| var("AWS_SECRET_ACCESS_KEY"))
                    .unwrap_or_default(),
                session_token: var("DIRECT_UPLOAD_SESSION_TOKEN")
                    .or_else(|| var("AWS_SESSION_TOKEN")),
                acl: args.acl.or_else(|| var("DIRECT_UPLOAD_ACL")),
            },
            signing_secret,
            upload_prefix: args
                .upload_prefix
                .or_else(|| var("DIRECT_UPLOAD_PREFIX"))
                .unwrap_or_default(),
            part_size,
            fields,
            skip_storage_check: args.skip_storage_check
                || var("DIRECT_UPLOAD_SKIP_STORAGE_CHECK").is_some_and(|v| v == "1" || v == "true"),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `id=namespace`
fn parse_field(spec: &str) -> Result<FieldDefinition> {
    let (id, namespace) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("field `{}` must be written as `id=namespace`", spec))?;
    let id = id.trim();
    if id.is_empty() {
        bail!("field `{}` has an empty ID", spec);
    }
    Ok(FieldDefinition::new(id, namespace.trim().trim_matches('/')))
}

/// Byte count with an optional `KiB`/`MiB`/`GiB` suffix.
fn parse_size(value: &str) -> Result<u64> {
    let value = value.trim();
    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(index) => value.split_at(index),
        None => (value, ""),
    };
    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kib" | "k" => KIB,
        "mib" | "m" => MIB,
        "gib" | "g" => GIB,
        other => bail!("unknown size unit `{}`", other),
    };
    let count = digits.parse::<u64>().context("size must be a whole number")?;
    count
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("size overflows"))
}
