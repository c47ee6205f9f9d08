// 1. Traits
pub use crate::gym::Env;
pub use crate::model::Model;
pub use crate::sim::{Simulation, SimulationAccessor};

// 2. The Core "Loop" Types
pub use crate::gym::{
    Counters, EnvStatus, Info, Reward, Step,
    action::Action,
    config::{EnvConfig, EnvMetadata, RenderMode},
    env::PhysiCellEnv,
    space::{BoxSpace, DType, Space, SpaceValue, Tensor},
};

// 3. Simulation Domain Types
pub use crate::model::drug_dose::DrugDoseModel;
pub use crate::settings::{CustomData, Domain, Settings};
pub use crate::sim::{CellTable, MicroenvTable, ParamValue, toy::ToySimulation};
pub use crate::timeseries::TimeSeries;

// 4. Rendering
pub use crate::render::{Figure, Frame};

// 5. Drift
pub use crate::drift::{
    DosePolicy, DriftConfig, DriftFinding, DriftHarness, DriftReport, TableKind,
};

// 6. Errors
pub use crate::error::{
    ConfigError, DataError, EnvError, IoError, PhysiGymError, PhysiGymResult, RenderError,
    SimError, SpaceError, SystemError,
};
