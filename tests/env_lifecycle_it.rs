mod common;

use physigym::prelude::*;
use rand::{SeedableRng, rngs::StdRng};

fn dose(v: f64) -> Action {
    Action::new().with_scalar("drug_dose", v)
}

#[test]
fn observations_always_conform_to_the_observation_space() {
    let dir = common::workdir(300.0, 16);
    let mut env = common::make_env(dir.path());

    for episode in 0..2 {
        let (obs, info) = env.reset(Some(episode)).unwrap();
        assert!(env.observation_space().contains(&obs));
        assert!(info.is_empty());

        loop {
            let step = env.step(dose(0.5)).unwrap();
            assert!(env.observation_space().contains(&step.observation));
            assert!((0.0..=1.0).contains(&step.reward.0), "{:?}", step.reward);
            if step.is_terminal() {
                break;
            }
        }
    }
    env.close().unwrap();
}

#[test]
fn step_env_never_resets_and_step_episode_does() {
    let dir = common::workdir(180.0, 8);
    let mut env = common::make_env(dir.path());

    let mut last_step_env = 0;
    for expected_episode in 0..3 {
        env.reset(Some(0)).unwrap();
        let c = env.counters();
        assert_eq!(c.episode, expected_episode);
        assert_eq!(c.step_episode, 0);
        assert_eq!(c.step_env, last_step_env);

        let mut steps = 0;
        while !env.step(dose(0.0)).unwrap().is_terminal() {
            steps += 1;
        }
        steps += 1;

        let c = env.counters();
        assert_eq!(c.step_episode, steps);
        assert!(c.step_env > last_step_env);
        last_step_env = c.step_env;
    }
    assert_eq!(last_step_env, 9);
}

#[test]
fn episode_ends_by_truncation_at_max_time() {
    let dir = common::workdir(240.0, 16);
    let mut env = common::make_env(dir.path());
    env.reset(Some(7)).unwrap();

    let mut last = None;
    for _ in 0..4 {
        last = Some(env.step(dose(0.0)).unwrap());
    }
    let last = last.unwrap();
    assert!(last.truncated || last.terminated);
    assert_eq!(env.status(), EnvStatus::EpisodeDone);
    assert!(env.step(dose(0.0)).is_err());
}

#[test]
fn sampled_actions_are_accepted_by_step() {
    let dir = common::workdir(600.0, 16);
    let mut env = common::make_env(dir.path());
    let mut rng = StdRng::seed_from_u64(42);
    env.reset(Some(0)).unwrap();

    for _ in 0..10 {
        let action = env.sample_action_with(&mut rng).unwrap();
        assert!(env.action_space().contains(&action.as_space_value()));
        let step = env.step(action).unwrap();
        if step.is_terminal() {
            env.reset(None).unwrap();
        }
    }
}

#[test]
fn out_of_range_dose_is_rejected() {
    let dir = common::workdir(300.0, 16);
    let mut env = common::make_env(dir.path());
    env.reset(Some(0)).unwrap();

    let err = env.step(dose(1.5)).unwrap_err();
    assert!(matches!(err, PhysiGymError::Env(EnvError::InvalidAction(_))), "{err}");
    assert_eq!(env.counters().step_episode, 0);
}

#[test]
fn same_seed_replays_the_same_observations() {
    let dir = common::workdir(300.0, 16);
    let mut env = common::make_env(dir.path());

    let run = |env: &mut PhysiCellEnv<ToySimulation, DrugDoseModel>| {
        let (first, _) = env.reset(Some(3)).unwrap();
        let mut seen = vec![first];
        loop {
            let step = env.step(dose(0.8)).unwrap();
            let done = step.is_terminal();
            seen.push(step.observation);
            if done {
                return seen;
            }
        }
    };
    let a = run(&mut env);
    let b = run(&mut env);
    assert_eq!(a, b);
}

#[test]
fn metadata_reports_render_configuration() {
    let dir = common::workdir(300.0, 4);
    let cfg = common::config(dir.path())
        .with_render_mode(RenderMode::RgbArray)
        .with_render_fps(4);
    let settings = Settings::from_path(cfg.settingxml_path()).unwrap();
    let sim = ToySimulation::new(&settings, dir.path().join("output"));
    let env = PhysiCellEnv::new(cfg, sim, DrugDoseModel::default()).unwrap();

    let metadata = env.metadata();
    assert_eq!(metadata.render_fps, 4);
    assert_eq!(env.config().render_mode(), Some(RenderMode::RgbArray));
    assert_eq!(env.status(), EnvStatus::Ready);
}
