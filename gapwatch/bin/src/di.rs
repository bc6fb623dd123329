use anyhow::Context;
use gapwatch_application::bar_store::BarStoreImplParameters;
use gapwatch_application::services::GapMonitorServiceImplParameters;
use gapwatch_application::{BarStoreImpl, GapMonitorServiceImpl, MonitorConfig};
use gapwatch_infrastructure::ledger::JsonGapLedgerParameters;
use gapwatch_infrastructure::repositories::ParquetBarRepositoryParameters;
use gapwatch_infrastructure::sources::MockBarSourceParameters;
use gapwatch_infrastructure::{JsonGapLedger, MockBarSource, ParquetBarRepository, TracingEventSink};
use shaku::module;
use std::collections::HashMap;
use tokio::sync::Mutex;

module! {
    pub AppModule {
        components = [
            GapMonitorServiceImpl,
            BarStoreImpl,
            ParquetBarRepository,
            JsonGapLedger,
            MockBarSource,
            TracingEventSink
        ],
        providers = []
    }
}

pub fn create_app_module(config: &MonitorConfig) -> anyhow::Result<AppModule> {
    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("Failed to create data directory {}", config.data_dir.display())
    })?;

    let module = AppModule::builder()
        .with_component_parameters::<GapMonitorServiceImpl>(GapMonitorServiceImplParameters {
            config: config.clone(),
            aggregator: Mutex::new(None),
        })
        .with_component_parameters::<BarStoreImpl>(BarStoreImplParameters {
            cache_size: config.cache_size,
            grid_tolerance_secs: config.grid_tolerance_secs,
            series: Mutex::new(HashMap::new()),
        })
        .with_component_parameters::<ParquetBarRepository>(ParquetBarRepositoryParameters {
            data_dir: config.data_dir.clone(),
            write_lock: Mutex::new(()),
        })
        .with_component_parameters::<JsonGapLedger>(JsonGapLedgerParameters {
            path: config.ledger_path.clone(),
        })
        .with_component_parameters::<MockBarSource>(MockBarSourceParameters {
            base_price: 50_000.0,
            volatility: 0.05,
        })
        .build();
    Ok(module)
}
