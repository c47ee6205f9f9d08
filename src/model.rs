//! Policy callbacks the environment core delegates to.
//!
//! A [`Model`] declares the two spaces and turns the simulation state into
//! observations, rewards and figures. It never mutates the simulation and
//! never touches the counters; both stay with the core.

use crate::{
    error::PhysiGymResult,
    gym::{Counters, Info, Reward, space::{Space, SpaceValue}},
    render::Figure,
    settings::Settings,
    sim::SimulationAccessor,
};

pub mod drug_dose;

/// Read-only view handed to every callback.
#[derive(Clone, Copy)]
pub struct ModelCtx<'a> {
    pub sim: &'a dyn SimulationAccessor,
    pub settings: &'a Settings,
    pub counters: Counters,
}

pub trait Model {
    /// Queried once at construction.
    fn get_action_space(&self) -> PhysiGymResult<Space>;

    /// Queried once at construction.
    fn get_observation_space(&self) -> PhysiGymResult<Space>;

    fn get_observation(&self, ctx: &ModelCtx<'_>) -> PhysiGymResult<SpaceValue>;

    fn get_info(&self, _ctx: &ModelCtx<'_>) -> PhysiGymResult<Info> {
        Ok(Info::default())
    }

    fn get_terminated(&self, ctx: &ModelCtx<'_>) -> PhysiGymResult<bool>;

    fn get_reward(&self, ctx: &ModelCtx<'_>) -> PhysiGymResult<Reward>;

    /// Repopulates `fig` from the current simulation state.
    fn get_img(&self, ctx: &ModelCtx<'_>, fig: &mut Figure) -> PhysiGymResult<()>;
}
