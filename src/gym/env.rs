use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, info};

use crate::{
    error::{EnvError, PhysiGymResult},
    gym::{
        Counters, Env, EnvStatus, Info, Step,
        action::{Action, Forward},
        config::{EnvConfig, EnvMetadata, RenderMode},
        space::{Space, SpaceValue},
    },
    io,
    model::{Model, ModelCtx},
    render::{Figure, Frame, raster},
    settings::{CustomData, Settings},
    sim::Simulation,
};

/// Gymnasium-style environment around an external agent-based simulation.
///
/// The environment owns the counters, the status machine and the render
/// figure. Everything model specific is delegated to `M`, everything the
/// cells and substrates do is delegated to `S`.
#[derive(Debug)]
pub struct PhysiCellEnv<S, M> {
    // === Public (configurable) ===
    cfg: EnvConfig,

    // === Internal only ===
    /// Parsed once at construction.
    settings: Settings,

    sim: S,

    model: M,

    action_space: Space,

    observation_space: Space,

    counters: Counters,

    /// Persistent drawing surface, cleared by every render.
    fig: Figure,

    /// Environment RNG, reseeded whenever `reset()` receives a seed.
    rng: StdRng,

    env_status: EnvStatus,
}

impl<S: Simulation, M: Model> PhysiCellEnv<S, M> {
    #[tracing::instrument(skip(sim, model), fields(settingxml = %cfg.settingxml_path().display()))]
    pub fn new(cfg: EnvConfig, sim: S, model: M) -> PhysiGymResult<Self> {
        cfg.validate()?;
        let settings = Settings::from_path(cfg.settingxml_path())?;
        Self::with_settings(cfg, settings, sim, model)
    }

    /// Builds the environment from an already parsed settings document.
    pub fn with_settings(cfg: EnvConfig, settings: Settings, sim: S, model: M) -> PhysiGymResult<Self> {
        cfg.validate()?;
        let action_space = model.get_action_space()?;
        if !matches!(action_space, Space::Dict(_)) {
            return Err(EnvError::InvalidConfig(
                "the action space must be a dictionary of named fields".to_string(),
            )
            .into());
        }
        let observation_space = model.get_observation_space()?;

        let (width, height) = cfg.frame_size();
        let rng = match settings.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        info!(
            max_time = settings.max_time,
            dt_gym = settings.dt_gym,
            render_mode = ?cfg.render_mode(),
            "Environment created"
        );

        Ok(Self {
            cfg,
            settings,
            sim,
            model,
            action_space,
            observation_space,
            counters: Counters::default(),
            fig: Figure::new(width, height),
            rng,
            env_status: EnvStatus::Ready,
        })
    }

    pub fn action_space(&self) -> &Space {
        &self.action_space
    }

    pub fn observation_space(&self) -> &Space {
        &self.observation_space
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn status(&self) -> EnvStatus {
        self.env_status
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config(&self) -> &EnvConfig {
        &self.cfg
    }

    pub fn sim(&self) -> &S {
        &self.sim
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn figure(&self) -> &Figure {
        &self.fig
    }

    pub fn metadata(&self) -> EnvMetadata {
        EnvMetadata {
            render_modes: vec![RenderMode::Human, RenderMode::RgbArray],
            render_fps: self.cfg.render_fps(),
        }
    }

    /// Draws a random member of the action space from the environment RNG.
    pub fn sample_action(&mut self) -> PhysiGymResult<Action> {
        let value = self.action_space.sample(&mut self.rng);
        Action::try_from(value)
    }

    /// Draws a random member of the action space from a caller-owned RNG.
    pub fn sample_action_with<R: Rng>(&self, rng: &mut R) -> PhysiGymResult<Action> {
        Action::try_from(self.action_space.sample(rng))
    }

    /// Repopulates the figure and emits it according to the render mode.
    ///
    /// `rgb_array` returns the frame, `human` writes it as a PNG below the
    /// output folder and returns `None`, no render mode does nothing.
    pub fn render(&mut self) -> PhysiGymResult<Option<Frame>> {
        let Some(mode) = self.cfg.render_mode() else {
            return Ok(None);
        };

        let ctx = ModelCtx {
            sim: &self.sim,
            settings: &self.settings,
            counters: self.counters,
        };
        self.model.get_img(&ctx, &mut self.fig)?;

        match mode {
            RenderMode::RgbArray => raster::rasterize(&self.fig).map(Some),
            RenderMode::Human => {
                let dir = self
                    .cfg
                    .workdir()
                    .join(&self.settings.save_folder)
                    .join("render");
                io::ensure_dir(&dir)?;
                let path = dir.join(format!("frame_{:05}.png", self.counters.step_env));
                raster::save_png(&self.fig, &path)?;
                debug!(path = %path.display(), "Frame written");
                Ok(None)
            }
        }
    }
}

impl<S: Simulation, M: Model> Env for PhysiCellEnv<S, M> {
    #[tracing::instrument(skip(self), fields(episode = self.counters.episode))]
    fn reset(&mut self, seed: Option<u64>) -> PhysiGymResult<(SpaceValue, Info)> {
        use EnvStatus::*;

        match self.env_status {
            Closed => {
                return Err(EnvError::InvalidState(
                    "Environment is closed. Create a new environment to continue.".to_string(),
                )
                .into());
            }
            Ready => {}
            Running | EpisodeDone => {
                self.sim.stop()?;
                self.counters.episode += 1;
            }
        }
        self.counters.step_episode = 0;

        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.sim.start(seed)?;

        // Per lifecycle, the state is ALWAYS Running after a reset.
        self.env_status = Running;

        let observation = self.observe()?;
        let info = self.model.get_info(&self.ctx())?;

        info!(
            episode = self.counters.episode,
            step_env = self.counters.step_env,
            seed = ?seed,
            "Episode Starting"
        );

        if self.cfg.render_mode() == Some(RenderMode::Human) {
            self.render()?;
        }
        Ok((observation, info))
    }

    fn step(&mut self, action: Action) -> PhysiGymResult<Step> {
        self.check_step_status()?;

        // 1. Validate A(t)
        if let Some(reason) = self.action_space.explain_mismatch(&action.as_space_value()) {
            return Err(EnvError::InvalidAction(reason).into());
        }

        // 2. Apply A(t)
        self.apply_action(&action)?;

        // 3. Transition Dynamics (t -> t + dt_gym)
        self.sim.step()?;
        self.counters.step_env += 1;
        self.counters.step_episode += 1;

        // 4. Observe S(t+1)
        let observation = self.observe()?;
        let ctx = self.ctx();
        let terminated = self.model.get_terminated(&ctx)?;
        let truncated = self.sim.time() >= self.settings.max_time;
        let info = self.model.get_info(&ctx)?;
        let reward = self.model.get_reward(&ctx)?;

        // 5. Update Status
        if terminated || truncated {
            self.env_status = EnvStatus::EpisodeDone;
        }

        let Counters {
            step_env,
            episode,
            step_episode,
        } = self.counters;
        if self.cfg.verbose() {
            info!(step_env, episode, step_episode, reward = reward.0, terminated, truncated, "Step");
        } else {
            debug!(step_env, episode, step_episode, reward = reward.0, terminated, truncated, "Step");
        }

        if self.cfg.render_mode() == Some(RenderMode::Human) {
            self.render()?;
        }

        Ok(Step {
            observation,
            reward,
            terminated,
            truncated,
            info,
        })
    }

    #[tracing::instrument(skip(self))]
    fn close(&mut self) -> PhysiGymResult<()> {
        if matches!(self.env_status, EnvStatus::Running | EnvStatus::EpisodeDone) {
            self.sim.stop()?;
        }
        self.env_status = EnvStatus::Closed;
        info!(step_env = self.counters.step_env, "Environment closed");
        Ok(())
    }
}

impl<S: Simulation, M: Model> PhysiCellEnv<S, M> {
    fn ctx(&self) -> ModelCtx<'_> {
        ModelCtx {
            sim: &self.sim,
            settings: &self.settings,
            counters: self.counters,
        }
    }

    fn observe(&self) -> PhysiGymResult<SpaceValue> {
        let observation = self.model.get_observation(&self.ctx())?;
        if let Some(reason) = self.observation_space.explain_mismatch(&observation) {
            return Err(EnvError::ObservationOutOfSpace(reason).into());
        }
        Ok(observation)
    }

    /// Routes every field to the simulation by what its label names.
    fn apply_action(&mut self, action: &Action) -> PhysiGymResult<()> {
        for (label, value) in action.iter() {
            let forward = Forward::from_value(label, value)?;
            if self.settings.is_user_parameter(label) {
                let value = match forward {
                    Forward::Scalar(v) => v,
                    Forward::Vector(_) => {
                        return Err(EnvError::UnsupportedActionValue {
                            label: label.clone(),
                            msg: "user parameters take a single value".to_string(),
                        }
                        .into());
                    }
                };
                self.sim.set_parameter(label, value)?;
                continue;
            }

            match (self.settings.custom_data(label), forward) {
                (Some(CustomData::Scalar(_)), Forward::Scalar(v)) => {
                    let v = v.try_f64(label)?;
                    self.sim.set_variable(label, v)?;
                }
                (Some(CustomData::Vector(_)), Forward::Vector(v)) => {
                    self.sim.set_vector(label, &v)?;
                }
                (Some(kind), _) => {
                    return Err(EnvError::UnsupportedActionValue {
                        label: label.clone(),
                        msg: format!("value does not match custom data {kind:?}"),
                    }
                    .into());
                }
                (None, _) => return Err(EnvError::UnknownActionLabel(label.clone()).into()),
            }
        }
        Ok(())
    }

    fn check_step_status(&self) -> PhysiGymResult<()> {
        use EnvStatus::*;
        match self.env_status {
            Running => Ok(()),
            Ready => Err(EnvError::InvalidState(
                "Environment is not started. Call `reset()` before stepping.".to_string(),
            )
            .into()),
            EpisodeDone => Err(EnvError::InvalidState(
                "Episode is done. Call `reset()` before stepping.".to_string(),
            )
            .into()),
            Closed => Err(EnvError::InvalidState(
                "Environment is closed. No further steps allowed.".to_string(),
            )
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gym::Reward,
        model::drug_dose::DrugDoseModel,
        sim::{SimulationAccessor, toy::ToySimulation},
    };

    const XML: &str = r#"<PhysiCell_settings>
    <domain>
        <x_min>-60</x_min><x_max>60</x_max>
        <y_min>-60</y_min><y_max>60</y_max>
        <z_min>-10</z_min><z_max>10</z_max>
        <dx>20</dx><dy>20</dy><dz>20</dz>
        <use_2D>true</use_2D>
    </domain>
    <overall><max_time>300</max_time></overall>
    <options><random_seed>0</random_seed></options>
    <save><folder>output</folder><full_data><interval>60</interval></full_data></save>
    <microenvironment_setup><variable name="drug" ID="0"/></microenvironment_setup>
    <cell_definitions>
        <cell_definition name="tumor" ID="0">
            <custom_data><sensitivity>0.5</sensitivity><direction>1,0,0</direction></custom_data>
        </cell_definition>
    </cell_definitions>
    <user_parameters>
        <cell_count type="int">0</cell_count>
        <number_of_cells type="int">16</number_of_cells>
        <drug_dose type="double">0.0</drug_dose>
    </user_parameters>
</PhysiCell_settings>"#;

    fn env(dir: &std::path::Path) -> PhysiCellEnv<ToySimulation, DrugDoseModel> {
        let settings: Settings = XML.parse().unwrap();
        let sim = ToySimulation::new(&settings, dir.join("output"));
        let cfg = EnvConfig::default().with_workdir(dir).with_verbose(false);
        PhysiCellEnv::with_settings(cfg, settings, sim, DrugDoseModel::default()).unwrap()
    }

    fn dose(v: f64) -> Action {
        Action::new().with_scalar("drug_dose", v)
    }

    #[test]
    fn test_step_before_reset_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env(dir.path());
        let err = env.step(dose(0.0)).unwrap_err();
        assert!(err.to_string().contains("reset()"), "{err}");
    }

    #[test]
    fn test_reset_and_step_update_counters() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env(dir.path());

        env.reset(Some(0)).unwrap();
        assert_eq!(env.counters(), Counters::default());
        assert!(env.status().is_running());

        env.step(dose(0.01)).unwrap();
        env.step(dose(0.01)).unwrap();
        assert_eq!(env.counters().step_env, 2);
        assert_eq!(env.counters().step_episode, 2);

        env.reset(Some(0)).unwrap();
        assert_eq!(
            env.counters(),
            Counters {
                step_env: 2,
                episode: 1,
                step_episode: 0
            }
        );
    }

    #[test]
    fn test_episode_truncates_at_max_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env(dir.path());
        env.reset(Some(0)).unwrap();

        let mut steps = 0;
        loop {
            let step = env.step(dose(0.0)).unwrap();
            steps += 1;
            assert!((0.0..=1.0).contains(&step.reward.0));
            if step.is_terminal() {
                assert!(step.truncated);
                break;
            }
        }
        // max_time 300 at dt_gym 60.
        assert_eq!(steps, 5);
        assert!(env.status().is_episode_done());
        assert!(env.step(dose(0.0)).is_err());
    }

    #[test]
    fn test_invalid_and_unknown_actions() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env(dir.path());
        env.reset(Some(0)).unwrap();

        let err = env.step(dose(2.0)).unwrap_err();
        assert!(err.to_string().starts_with("Invalid action"), "{err}");

        let err = env.apply_action(&Action::new().with_scalar("nope", 1.0)).unwrap_err();
        assert!(err.to_string().contains("'nope'"), "{err}");

        env.apply_action(&Action::new().with_scalar("sensitivity", 0.9)).unwrap();
        assert_eq!(env.sim().variable("sensitivity").unwrap()[0], 0.9);
    }

    #[test]
    fn test_close_is_final() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env(dir.path());
        env.reset(None).unwrap();
        env.close().unwrap();
        assert!(env.status().is_closed());
        assert!(env.reset(None).is_err());
        assert!(env.step(dose(0.0)).is_err());
    }

    #[test]
    fn test_sampled_actions_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env(dir.path());
        env.reset(Some(3)).unwrap();
        for _ in 0..3 {
            let action = env.sample_action().unwrap();
            let step = env.step(action).unwrap();
            assert!(step.reward >= Reward(0.0));
        }
    }

    #[test]
    fn test_render_without_mode_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env(dir.path());
        env.reset(Some(0)).unwrap();
        assert!(env.render().unwrap().is_none());
        assert!(env.figure().is_empty());
    }

    #[test]
    fn test_rgb_array_render_after_step() {
        let dir = tempfile::tempdir().unwrap();
        let settings: Settings = XML.parse().unwrap();
        let sim = ToySimulation::new(&settings, dir.path().join("output"));
        let cfg = EnvConfig::default()
            .with_workdir(dir.path())
            .with_render_mode(RenderMode::RgbArray)
            .with_verbose(false);
        let mut env = PhysiCellEnv::with_settings(cfg, settings, sim, DrugDoseModel::default()).unwrap();
        env.reset(Some(0)).unwrap();
        env.step(dose(0.5)).unwrap();

        let frame = env.render().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (800, 600));

        let axes = env.figure().axes().unwrap();
        let title = axes.title.as_deref().unwrap();
        assert!(
            title.starts_with("dt_gym env step 0001 episode 000 episode step 001 : "),
            "{title}"
        );
        assert!(title.ends_with(" / 128 [cell]"), "{title}");
        assert_eq!(axes.xlim, Some((-60.0, 60.0)));
        assert_eq!(axes.ylim, Some((-60.0, 60.0)));

        let labels: Vec<_> = env.figure().colorbars().iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["drug_concentration", "apoptosis_rate"]);
    }
}
