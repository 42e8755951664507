//! End-to-end tests of the latent Q-learning agent on a toy chain
//! environment.
use anyhow::Result;
use auxrl_core::{
    error::AuxrlError,
    record::Record,
    replay_buffer::{SequenceReplayBuffer, SequenceReplayBufferConfig},
    Act, Agent, Configurable, Env, Obs, Policy, SequenceReplayBufferBase, Step,
};
use auxrl_tch_agent::{
    encoder::EncoderConfig,
    latent_q::{
        LatentModelConfig, LatentQ, LatentQConfig, LatentQExplorer, LatentShift, LossWeights,
        QuantileHeadConfig, ValueHeadConfig,
    },
    mlp::MlpConfig,
    tensor_batch::TensorBatch,
};
use tch::Tensor;
use tempdir::TempDir;

const OBS_DIM: i64 = 4;
const LATENT_DIM: i64 = 8;
const N_ACTIONS: i64 = 2;

#[derive(Clone, Debug)]
struct ChainObs(Vec<f32>);

impl Obs for ChainObs {
    fn len(&self) -> usize {
        1
    }
}

impl From<ChainObs> for Tensor {
    fn from(obs: ChainObs) -> Tensor {
        Tensor::from_slice(&obs.0).unsqueeze(0)
    }
}

#[derive(Clone, Debug)]
struct ChainAct(i64);

impl Act for ChainAct {
    fn len(&self) -> usize {
        1
    }
}

impl From<Tensor> for ChainAct {
    fn from(t: Tensor) -> Self {
        ChainAct(t.int64_value(&[0, 0]))
    }
}

/// A deterministic chain: action 1 moves right, action 0 moves left, the
/// episode ends after `len` steps. Observations encode the position.
struct ChainEnv {
    pos: i64,
    t: usize,
    len: usize,
}

impl ChainEnv {
    fn obs(&self) -> ChainObs {
        let p = self.pos as f32;
        ChainObs(vec![p, 0.5 * p, -p, 0.25])
    }
}

impl Env for ChainEnv {
    type Config = usize;
    type Obs = ChainObs;
    type Act = ChainAct;
    type Info = ();

    fn build(config: &Self::Config, _seed: i64) -> Result<Self> {
        Ok(Self {
            pos: 0,
            t: 0,
            len: *config,
        })
    }

    fn step(&mut self, a: &Self::Act) -> (Step<Self>, Record) {
        self.pos += if a.0 == 1 { 1 } else { -1 };
        self.t += 1;
        let is_terminal = self.t >= self.len;
        let step = Step::new(
            self.obs(),
            a.clone(),
            vec![self.pos as f32],
            vec![is_terminal as i8],
            (),
        );
        (step, Record::empty())
    }

    fn reset(&mut self) -> Result<Self::Obs> {
        self.pos = 0;
        self.t = 0;
        Ok(self.obs())
    }
}

type Buffer = SequenceReplayBuffer<TensorBatch, TensorBatch, TensorBatch>;
type ChainAgent = LatentQ<ChainEnv, Buffer>;

fn obs_batch(p: f32) -> TensorBatch {
    TensorBatch::from_tensor(Tensor::from_slice(&[p, 0.5 * p, -p, 0.25]).unsqueeze(0))
}

fn act_batch(a: i64) -> TensorBatch {
    TensorBatch::from_tensor(Tensor::from_slice(&[a]).unsqueeze(0))
}

fn probe_obs() -> Tensor {
    Tensor::from_slice(&[0.1f32, 0.2, 0.3, 0.4]).unsqueeze(0)
}

fn model_config(mem_len: i64, head_config: ValueHeadConfig) -> LatentModelConfig {
    let encoder = EncoderConfig::new(OBS_DIM, vec![16], LATENT_DIM).mem_len(mem_len);
    let trans = MlpConfig::new("transition", LATENT_DIM + N_ACTIONS, vec![16], LATENT_DIM);
    LatentModelConfig::new(encoder, head_config, trans)
}

fn scalar_head() -> ValueHeadConfig {
    ValueHeadConfig::scalar(LATENT_DIM, vec![16], N_ACTIONS)
}

fn quantile_head() -> ValueHeadConfig {
    ValueHeadConfig::quantile(QuantileHeadConfig::new(
        LATENT_DIM,
        64,
        8,
        vec![16],
        N_ACTIONS,
    ))
}

fn agent_config(mem_len: i64, head_config: ValueHeadConfig) -> LatentQConfig {
    LatentQConfig::default()
        .model_config(model_config(mem_len, head_config))
        .batch_size(4)
        .train(true)
        .device(tch::Device::Cpu)
}

fn buffer() -> Buffer {
    Buffer::build(&SequenceReplayBufferConfig::default().capacity(100).seed(7))
}

/// Fills the buffer with episodes of the given length, no latent snapshots.
fn fill_buffer(buffer: &mut Buffer, n_steps: usize, episode_len: usize) {
    let mut p = 0f32;
    buffer.add_first(obs_batch(p));
    for t in 0..n_steps {
        let a = (t % 2) as i64;
        let next = p + 1.0;
        let is_terminal = (t + 1) % episode_len == 0;
        buffer
            .add(act_batch(a), obs_batch(next), 0.1, is_terminal, None)
            .unwrap();
        if is_terminal {
            p = 0.0;
            buffer.add_first(obs_batch(p));
        } else {
            p = next;
        }
    }
}

/// Fills the buffer by rolling out the agent, storing its memory windows.
fn fill_buffer_with_agent(buffer: &mut Buffer, agent: &mut ChainAgent, n_steps: usize) {
    let episode_len = 10;
    let mut p = 0f32;
    agent.reset();
    buffer.add_first(obs_batch(p));
    for t in 0..n_steps {
        let obs = Tensor::from_slice(&[p, 0.5 * p, -p, 0.25]).unsqueeze(0);
        let (act, window) = agent.select_action(&obs, false);
        let a = act.int64_value(&[0, 0]);
        let next = p + 1.0;
        let is_terminal = (t + 1) % episode_len == 0;
        buffer
            .add(
                act_batch(a),
                obs_batch(next),
                0.1,
                is_terminal,
                window.map(TensorBatch::from_tensor),
            )
            .unwrap();
        if is_terminal {
            p = 0.0;
            agent.reset();
            buffer.add_first(obs_batch(p));
        } else {
            p = next;
        }
    }
}

fn greedy_q(agent: &ChainAgent, online: bool) -> Tensor {
    let model = if online {
        agent.model()
    } else {
        agent.model_tgt()
    };
    let z = model.encoder.forward(&probe_obs(), None);
    model.head.greedy_values(&z)
}

#[test]
fn rejects_pred_td_with_memory_encoder() {
    let config = agent_config(2, scalar_head()).train_seq_len(4).pred_td(true);
    assert!(config.validate().is_err());
}

#[test]
fn rejects_short_training_sequences() {
    let config = agent_config(3, scalar_head()).train_seq_len(2);
    assert!(config.validate().is_err());
}

#[test]
fn rejects_negative_loss_weights() {
    let config =
        agent_config(0, scalar_head()).loss_weights(LossWeights::new(-1.0, 0.0, 0.0, 1.0));
    assert!(config.validate().is_err());
}

#[test]
fn opt_is_noop_until_buffer_is_ready() {
    let mut agent = ChainAgent::build(agent_config(0, scalar_head()));
    let mut buffer = buffer();
    fill_buffer(&mut buffer, 2, 5);

    let record = agent.opt(&mut buffer).unwrap();
    assert_eq!(record.get_scalar("loss_total").unwrap(), 0.0);

    let q_before = greedy_q(&agent, true);
    let q_after = greedy_q(&agent, true);
    assert_eq!(q_before, q_after);
}

#[test]
fn training_updates_online_and_sync_restores_target() {
    let mut agent = ChainAgent::build(agent_config(0, scalar_head()));
    let mut buffer = buffer();
    fill_buffer(&mut buffer, 50, 10);

    for _ in 0..3 {
        let record = agent.opt(&mut buffer).unwrap();
        assert!(record.get_scalar("loss_total").unwrap().is_finite());
    }

    // The online model has moved while the target stayed at the values of
    // the initial synchronization.
    assert_ne!(greedy_q(&agent, true), greedy_q(&agent, false));

    agent.sync_target().unwrap();
    assert_eq!(greedy_q(&agent, true), greedy_q(&agent, false));
}

#[test]
fn sync_interval_of_one_tracks_every_update() {
    // With all loss weights zero the gradients vanish and Adam leaves the
    // parameters untouched, so after an update with interval 1 the target
    // must match the online model exactly.
    let config = agent_config(0, scalar_head())
        .loss_weights(LossWeights::new(0.0, 0.0, 0.0, 0.0))
        .target_update_interval(1);
    let mut agent = ChainAgent::build(config);
    let mut buffer = buffer();
    fill_buffer(&mut buffer, 50, 10);

    agent.opt(&mut buffer).unwrap();
    assert_eq!(greedy_q(&agent, true), greedy_q(&agent, false));
}

#[test]
fn value_loss_dominates_total_with_default_weights() {
    let mut agent = ChainAgent::build(agent_config(0, scalar_head()));
    let mut buffer = buffer();
    fill_buffer(&mut buffer, 50, 10);

    let record = agent.opt(&mut buffer).unwrap();
    assert_eq!(
        record.get_scalar("loss_value").unwrap(),
        record.get_scalar("loss_total").unwrap()
    );
}

#[test]
fn all_four_loss_terms_are_finite() {
    let config = agent_config(0, scalar_head())
        .loss_weights(LossWeights::new(1.0, 0.1, 0.1, 1.0));
    let mut agent = ChainAgent::build(config);
    let mut buffer = buffer();
    fill_buffer(&mut buffer, 50, 10);

    let record = agent.opt(&mut buffer).unwrap();
    for key in [
        "loss_pos_sample",
        "loss_neg_neighbor",
        "loss_neg_random",
        "loss_value",
        "loss_total",
    ]
    .iter()
    {
        assert!(record.get_scalar(key).unwrap().is_finite(), "{}", key);
    }
}

#[test]
fn bootstrapped_prediction_target_trains() {
    let config = agent_config(0, scalar_head())
        .loss_weights(LossWeights::new(1.0, 0.0, 0.0, 1.0))
        .pred_td(true);
    let mut agent = ChainAgent::build(config);
    assert_eq!(agent.replay_seq_len(), 2);

    let mut buffer = buffer();
    fill_buffer(&mut buffer, 50, 10);

    let record = agent.opt(&mut buffer).unwrap();
    assert!(record.get_scalar("loss_pos_sample").unwrap().is_finite());
}

#[test]
fn memory_encoder_trains_from_stored_windows() {
    let config = agent_config(2, scalar_head())
        .loss_weights(LossWeights::new(1.0, 0.1, 0.1, 1.0))
        .train_seq_len(3);
    let mut agent = ChainAgent::build(config);
    assert_eq!(agent.replay_seq_len(), 4);

    let mut buffer = buffer();
    fill_buffer_with_agent(&mut buffer, &mut agent, 60);

    let record = agent.opt(&mut buffer).unwrap();
    assert!(record.get_scalar("loss_total").unwrap().is_finite());
}

#[test]
fn memory_encoder_rejects_transitions_without_snapshots() {
    let config = agent_config(2, scalar_head()).train_seq_len(3);
    let mut agent = ChainAgent::build(config);

    let mut buffer = buffer();
    fill_buffer(&mut buffer, 60, 10);

    let err = agent.opt(&mut buffer).unwrap_err();
    match err.downcast_ref::<AuxrlError>() {
        Some(AuxrlError::MissingLatent) => {}
        _ => panic!("unexpected error: {}", err),
    }
}

#[test]
fn quantile_head_trains() {
    let config = agent_config(0, quantile_head()).batch_size(8);
    let mut agent = ChainAgent::build(config);
    let mut buffer = buffer();
    fill_buffer(&mut buffer, 50, 10);

    for _ in 0..2 {
        let record = agent.opt(&mut buffer).unwrap();
        assert!(record.get_scalar("loss_value").unwrap().is_finite());
    }
}

#[test]
fn greedy_selection_is_deterministic() {
    for head in [scalar_head(), quantile_head()] {
        let mut agent = ChainAgent::build(agent_config(0, head));
        let (a1, _) = agent.select_action(&probe_obs(), true);
        let (a2, _) = agent.select_action(&probe_obs(), true);
        assert_eq!(a1, a2);
    }
}

#[test]
fn latent_shift_explorer_stays_in_action_range() {
    let config = agent_config(0, scalar_head())
        .explorer(LatentQExplorer::LatentShift(LatentShift::new().epsilon(1.0)));
    let mut agent = ChainAgent::build(config);

    for _ in 0..20 {
        let (act, _) = agent.select_action(&probe_obs(), false);
        let a = act.int64_value(&[0, 0]);
        assert!((0..N_ACTIONS).contains(&a));
    }
}

#[test]
fn memory_window_resets_between_episodes() {
    let mut agent = ChainAgent::build(agent_config(2, scalar_head()).train_seq_len(3));

    agent.reset();
    let (_, w0) = agent.select_action(&probe_obs(), true);
    let (_, w1) = agent.select_action(&probe_obs(), true);

    // The first window of an episode is all zeros; the second contains the
    // latent of the first observation.
    let w0 = w0.unwrap();
    let w1 = w1.unwrap();
    assert_eq!(w0, Tensor::zeros_like(&w0));
    assert_ne!(w1, Tensor::zeros_like(&w1));

    agent.reset();
    let (_, w2) = agent.select_action(&probe_obs(), true);
    assert_eq!(w2.unwrap(), Tensor::zeros_like(&w0));
}

#[test]
fn save_and_load_roundtrip() {
    let dir = TempDir::new("latent_q").unwrap();
    let mut agent = ChainAgent::build(agent_config(0, scalar_head()));
    let mut buffer = buffer();
    fill_buffer(&mut buffer, 50, 10);
    agent.opt(&mut buffer).unwrap();
    agent.save_params(dir.path()).unwrap();

    let mut restored = ChainAgent::build(agent_config(0, scalar_head()));
    restored.load_params(dir.path()).unwrap();

    assert_eq!(greedy_q(&agent, true), greedy_q(&restored, true));
    assert_eq!(greedy_q(&agent, false), greedy_q(&restored, false));
}

#[test]
fn loading_encoder_changes_encoder_but_not_head() {
    let dir = TempDir::new("latent_q").unwrap();
    let mut agent = ChainAgent::build(agent_config(0, scalar_head()));
    let mut buffer = buffer();
    fill_buffer(&mut buffer, 50, 10);
    for _ in 0..3 {
        agent.opt(&mut buffer).unwrap();
    }
    agent.save_params(dir.path()).unwrap();

    let mut other = ChainAgent::build(agent_config(0, scalar_head()));
    let fixed_z = Tensor::from_slice(&[0.3f32, -0.1, 0.2, 0.0, 0.5, -0.4, 0.1, 0.6]).unsqueeze(0);
    let z_before = other.model().encoder.forward(&probe_obs(), None);
    let q_before = other.model().head.greedy_values(&fixed_z);
    other
        .load_encoder(dir.path().join("latent_q.pt"), false)
        .unwrap();
    let z_after = other.model().encoder.forward(&probe_obs(), None);
    assert_ne!(z_before, z_after);

    let z_trained = agent.model().encoder.forward(&probe_obs(), None);
    assert_eq!(z_after, z_trained);

    // The value head is left untouched.
    let q_after = other.model().head.greedy_values(&fixed_z);
    assert_eq!(q_before, q_after);
}

#[test]
fn policy_samples_valid_actions_from_env() {
    let mut env = ChainEnv::build(&5, 0).unwrap();
    let mut agent = ChainAgent::build(agent_config(0, scalar_head()));
    agent.eval();

    let mut obs = env.reset().unwrap();
    for _ in 0..5 {
        let act = agent.sample(&obs);
        assert!((0..N_ACTIONS).contains(&act.0));
        let (step, _) = env.step(&act);
        let done = step.is_done();
        obs = step.obs;
        if done {
            obs = env.reset().unwrap();
        }
    }
}
