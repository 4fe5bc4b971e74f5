//! External collaborators: data pipeline, optimizer, validator, performance and market data

pub mod simulated;
pub mod traits;

pub use simulated::{
    SimulatedDataPipeline, SimulatedMarketData, SimulatedOptimizer, SimulatedPerformanceMonitor,
    SimulatedValidator,
};
pub use traits::*;

use std::sync::Arc;

/// The set of collaborators shared by detector and engine
#[derive(Clone)]
pub struct Collaborators {
    pub data: Arc<dyn DataPipeline>,
    pub optimizer: Arc<dyn Optimizer>,
    pub validator: Arc<dyn Validator>,
    pub performance: Arc<dyn PerformanceMonitor>,
    pub market: Arc<dyn MarketDataSource>,
}

impl Collaborators {
    /// Dry-run set backed by simulated implementations
    pub fn simulated() -> Self {
        Self {
            data: Arc::new(SimulatedDataPipeline::default()),
            optimizer: Arc::new(SimulatedOptimizer::default()),
            validator: Arc::new(SimulatedValidator),
            performance: Arc::new(SimulatedPerformanceMonitor::default()),
            market: Arc::new(SimulatedMarketData),
        }
    }
}
