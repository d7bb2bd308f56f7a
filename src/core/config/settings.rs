use super::parsing::{
    env_optional, env_or_default, is_supported_scan_extension, parse_bool, parse_cors_origins,
    parse_environment, parse_f32, parse_label_list, parse_string_list, parse_u16, parse_u32,
    parse_u64,
};
use super::types::{
    ApiSettings, ConfigError, CorsSettings, DatabaseSettings, GenerationSettings,
    RuntimeSettings, ServerHost, ServerPort, ServerSettings, Settings, TelemetrySettings,
    UploadSettings, WorkerSettings,
};
use crate::engine::answer_key::MAX_OPTIONS;
use crate::engine::optical::RecognitionConfig;
use crate::engine::variants::MIN_OPTIONS;

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("GAT_HOST", "0.0.0.0");
        let port = env_or_default("GAT_PORT", "8000");

        let environment = parse_environment(env_optional("GAT_ENV"));
        let strict_config =
            env_optional("GAT_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "GAT Grader API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "gat");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "gat_grader");
        let database_url = env_optional("DATABASE_URL");

        let variant_labels =
            parse_label_list(env_optional("VARIANT_LABELS"), &["A", "B", "C", "D"]);
        let master_variant = env_or_default("MASTER_VARIANT", "A").to_uppercase();
        let generation_seed = env_optional("GENERATION_SEED")
            .map(|value| parse_u64("GENERATION_SEED", value))
            .transpose()?;
        let generation_concurrency = parse_u32(
            "GENERATION_CONCURRENCY",
            env_or_default("GENERATION_CONCURRENCY", "4"),
        )?;

        let defaults = RecognitionConfig::default();
        let option_count =
            parse_u32("OMR_OPTION_COUNT", env_or_default("OMR_OPTION_COUNT", "4"))? as usize;
        let min_ink_pixels =
            parse_u32("OMR_MIN_INK_PIXELS", env_or_default("OMR_MIN_INK_PIXELS", "550"))?;
        let bubble_min_px =
            parse_u32("OMR_BUBBLE_MIN_PX", env_or_default("OMR_BUBBLE_MIN_PX", "18"))?;
        let bubble_max_px =
            parse_u32("OMR_BUBBLE_MAX_PX", env_or_default("OMR_BUBBLE_MAX_PX", "60"))?;
        let aspect_tolerance =
            parse_f32("OMR_ASPECT_TOLERANCE", env_or_default("OMR_ASPECT_TOLERANCE", "0.15"))?;
        let threshold_radius =
            parse_u32("OMR_THRESHOLD_RADIUS", env_or_default("OMR_THRESHOLD_RADIUS", "15"))?;
        let threshold_offset = parse_u16(
            "OMR_THRESHOLD_OFFSET",
            env_or_default("OMR_THRESHOLD_OFFSET", "10"),
        )?;
        let double_mark_margin = env_optional("OMR_DOUBLE_MARK_MARGIN")
            .map(|value| parse_u32("OMR_DOUBLE_MARK_MARGIN", value))
            .transpose()?;
        let render_overlay = env_optional("OMR_RENDER_OVERLAY")
            .map(|value| parse_bool(&value))
            .unwrap_or(defaults.render_overlay);

        let max_upload_size_mb =
            parse_u64("MAX_UPLOAD_SIZE_MB", env_or_default("MAX_UPLOAD_SIZE_MB", "15"))?;
        let max_scans_per_batch =
            parse_u32("MAX_SCANS_PER_BATCH", env_or_default("MAX_SCANS_PER_BATCH", "50"))?;
        let allowed_scan_extensions =
            parse_string_list(env_optional("ALLOWED_SCAN_EXTENSIONS"), &["jpg", "jpeg", "png"]);

        let scan_concurrency = parse_u32(
            "SCAN_WORKER_CONCURRENCY",
            env_or_default("SCAN_WORKER_CONCURRENCY", "2"),
        )?;
        let scan_max_attempts =
            parse_u32("SCAN_MAX_ATTEMPTS", env_or_default("SCAN_MAX_ATTEMPTS", "3"))?;

        let log_level = env_or_default("GAT_LOG_LEVEL", "info");
        let json = env_optional("GAT_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let threshold_offset = u8::try_from(threshold_offset).map_err(|_| {
            ConfigError::InvalidValue {
                field: "OMR_THRESHOLD_OFFSET",
                value: threshold_offset.to_string(),
            }
        })?;

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            generation: GenerationSettings {
                variant_labels,
                master_variant,
                seed: generation_seed,
                concurrency: generation_concurrency as usize,
            },
            recognition: RecognitionConfig {
                option_count,
                min_ink_pixels,
                bubble_min_px,
                bubble_max_px,
                aspect_tolerance,
                threshold_radius,
                threshold_offset,
                double_mark_margin,
                render_overlay,
            },
            uploads: UploadSettings {
                max_upload_size_mb,
                max_scans_per_batch: max_scans_per_batch as usize,
                allowed_scan_extensions,
            },
            worker: WorkerSettings {
                scan_concurrency: scan_concurrency as usize,
                scan_max_attempts,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn generation(&self) -> &GenerationSettings {
        &self.generation
    }

    pub(crate) fn recognition(&self) -> &RecognitionConfig {
        &self.recognition
    }

    pub(crate) fn uploads(&self) -> &UploadSettings {
        &self.uploads
    }

    pub(crate) fn worker(&self) -> &WorkerSettings {
        &self.worker
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let generation = &self.generation;
        if generation.variant_labels.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "VARIANT_LABELS",
                value: String::from("<empty>"),
            });
        }
        if !generation.variant_labels.contains(&generation.master_variant) {
            return Err(ConfigError::InvalidValue {
                field: "MASTER_VARIANT",
                value: generation.master_variant.clone(),
            });
        }
        if generation.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "GENERATION_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        let recognition = &self.recognition;
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&recognition.option_count) {
            return Err(ConfigError::InvalidValue {
                field: "OMR_OPTION_COUNT",
                value: recognition.option_count.to_string(),
            });
        }
        if recognition.bubble_min_px == 0 || recognition.bubble_min_px >= recognition.bubble_max_px
        {
            return Err(ConfigError::InvalidValue {
                field: "OMR_BUBBLE_MIN_PX",
                value: recognition.bubble_min_px.to_string(),
            });
        }
        if !(0.0..1.0).contains(&recognition.aspect_tolerance) {
            return Err(ConfigError::InvalidValue {
                field: "OMR_ASPECT_TOLERANCE",
                value: recognition.aspect_tolerance.to_string(),
            });
        }
        if recognition.threshold_radius == 0 {
            return Err(ConfigError::InvalidValue {
                field: "OMR_THRESHOLD_RADIUS",
                value: "0".to_string(),
            });
        }
        if recognition.double_mark_margin == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "OMR_DOUBLE_MARK_MARGIN",
                value: "0".to_string(),
            });
        }

        if self.uploads.max_upload_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_UPLOAD_SIZE_MB",
                value: "0".to_string(),
            });
        }
        if self.uploads.max_scans_per_batch == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_SCANS_PER_BATCH",
                value: "0".to_string(),
            });
        }
        if self.uploads.allowed_scan_extensions.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ALLOWED_SCAN_EXTENSIONS",
                value: String::from("<empty>"),
            });
        }
        for extension in &self.uploads.allowed_scan_extensions {
            if !is_supported_scan_extension(extension) {
                return Err(ConfigError::InvalidValue {
                    field: "ALLOWED_SCAN_EXTENSIONS",
                    value: extension.clone(),
                });
            }
        }

        if self.worker.scan_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "SCAN_WORKER_CONCURRENCY",
                value: "0".to_string(),
            });
        }
        if self.worker.scan_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "SCAN_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        Ok(())
    }
}
