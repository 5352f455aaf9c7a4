use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    #[error("simulation cancelled after {completed} of {requested} runs")]
    Cancelled { completed: u32, requested: u32 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("target success rate must be between 0 and 100, got {0}")]
    InvalidThreshold(f64),
    #[error("search bounds must be finite, non-negative and max > min")]
    InvalidBounds,
    #[error("tolerance must be > 0")]
    InvalidTolerance,
    #[error("max_iterations must be > 0")]
    ZeroIterations,
    #[error("runs per iteration must be > 0")]
    ZeroRuns,
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}
