//! Synthetic painter: end-to-end run of the actor/learner runtime.
//!
//! Each actor paints a small grayscale canvas, one 2x2 brush stroke per
//! step, trying to reproduce a random target image. Rewards are the change
//! in matching pixels. Two learners run side by side:
//!
//! - policy learner: advantage actor-critic on the rollout queue, with an
//!   extra reward at episode end from the newest discriminator
//! - discriminator learner: tells finished canvases from their targets
//!
//! Both use burn with the NdArray backend. Actors run inference on the
//! plain backend and load weights the policy learner publishes; the policy
//! learner loads weights the discriminator learner publishes.
//!
//! Run with: `cargo run -p paint_beast_demos --release -- [config.json]`

use std::error::Error;
use std::time::Duration;

use burn::backend::{Autodiff, NdArray};
use burn::module::{AutodiffModule, Module};
use burn::nn::{Linear, LinearConfig};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::activation::{log_sigmoid, log_softmax, relu, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use paint_beast::core::burn_interop::{decode_into, encode_module, to_float_tensor, to_int_tensor};
use paint_beast::{
    ActorId, Batch, BeastConfig, EnvStep, FrameImageBatch, PaintEnvironment, Policy,
    PolicyOutput, Runtime, TensorBlob, TensorError, TrainError, TrainOutcome, TrainStep,
    WeightSubscriber,
};

// ============================================================================
// Backend Types
// ============================================================================

type Inference = NdArray;
type Train = Autodiff<NdArray>;

// ============================================================================
// Environment
// ============================================================================

const SIDE: usize = 8;
const BRUSH: usize = 2;
const CELLS: usize = (SIDE / BRUSH) * (SIDE / BRUSH);
const N_ACTIONS: usize = CELLS * 2;
const OBS_SIZE: usize = 2 * SIDE * SIDE;
const STROKES_PER_EPISODE: usize = 12;

/// Grayscale canvas painted with black or white 2x2 strokes.
struct SyntheticCanvas {
    canvas: Vec<u8>,
    target: Vec<u8>,
    strokes: usize,
    rng: StdRng,
}

impl SyntheticCanvas {
    fn new(seed: u64) -> Self {
        Self {
            canvas: vec![0; SIDE * SIDE],
            target: vec![0; SIDE * SIDE],
            strokes: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn matches(&self) -> usize {
        self.canvas
            .iter()
            .zip(&self.target)
            .filter(|(c, t)| c == t)
            .count()
    }

    fn observation(&self) -> Vec<TensorBlob> {
        let values: Vec<f32> = self
            .canvas
            .iter()
            .chain(&self.target)
            .map(|&p| p as f32 / 255.0)
            .collect();
        vec![TensorBlob::from_slice(&values, vec![OBS_SIZE]).expect("observation shape")]
    }

    fn rgb(pixels: &[u8]) -> TensorBlob {
        let rgb: Vec<u8> = pixels.iter().flat_map(|&p| [p, p, p]).collect();
        TensorBlob::from_slice(&rgb, vec![SIDE, SIDE, 3]).expect("frame shape")
    }
}

impl PaintEnvironment for SyntheticCanvas {
    fn reset(&mut self) -> Vec<TensorBlob> {
        self.canvas.fill(0);
        // Target: random 2x2 blocks.
        let per_row = SIDE / BRUSH;
        for cell in 0..CELLS {
            let value = if self.rng.gen_bool(0.4) { 255 } else { 0 };
            let (cy, cx) = (cell / per_row * BRUSH, cell % per_row * BRUSH);
            for y in cy..cy + BRUSH {
                for x in cx..cx + BRUSH {
                    self.target[y * SIDE + x] = value;
                }
            }
        }
        self.strokes = 0;
        self.observation()
    }

    fn step(&mut self, action: &[TensorBlob]) -> EnvStep {
        let index = action
            .first()
            .and_then(|a| a.to_vec::<i64>().ok())
            .and_then(|v| v.first().copied())
            .unwrap_or(0) as usize
            % N_ACTIONS;
        let (cell, value) = (index / 2, if index % 2 == 1 { 255 } else { 0 });

        let before = self.matches();
        let per_row = SIDE / BRUSH;
        let (cy, cx) = (cell / per_row * BRUSH, cell % per_row * BRUSH);
        for y in cy..cy + BRUSH {
            for x in cx..cx + BRUSH {
                self.canvas[y * SIDE + x] = value;
            }
        }
        let reward = (self.matches() as f32 - before as f32) / (BRUSH * BRUSH) as f32;

        self.strokes += 1;
        EnvStep::new(
            self.observation(),
            reward,
            false,
            self.strokes >= STROKES_PER_EPISODE,
        )
    }

    fn frame(&self) -> TensorBlob {
        Self::rgb(&self.canvas)
    }

    fn target_image(&self) -> TensorBlob {
        Self::rgb(&self.target)
    }
}

// ============================================================================
// Networks
// ============================================================================

#[derive(Module, Debug)]
pub struct PolicyNet<B: Backend> {
    hidden: Linear<B>,
    policy_head: Linear<B>,
    value_head: Linear<B>,
}

impl<B: Backend> PolicyNet<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            hidden: LinearConfig::new(OBS_SIZE, 64).init(device),
            policy_head: LinearConfig::new(64, N_ACTIONS).init(device),
            value_head: LinearConfig::new(64, 1).init(device),
        }
    }

    /// Returns (logits `[N, A]`, values `[N]`).
    pub fn forward(&self, obs: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let n = obs.dims()[0];
        let x = relu(self.hidden.forward(obs));
        let logits = self.policy_head.forward(x.clone());
        let values = self.value_head.forward(x).reshape([n]);
        (logits, values)
    }
}

#[derive(Module, Debug)]
pub struct DiscriminatorNet<B: Backend> {
    hidden: Linear<B>,
    out: Linear<B>,
}

impl<B: Backend> DiscriminatorNet<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            hidden: LinearConfig::new(SIDE * SIDE * 3, 32).init(device),
            out: LinearConfig::new(32, 1).init(device),
        }
    }

    /// Realness logit per image.
    pub fn forward(&self, images: Tensor<B, 2>) -> Tensor<B, 2> {
        self.out.forward(relu(self.hidden.forward(images)))
    }
}

// ============================================================================
// Actor-side Policy
// ============================================================================

struct NetPolicy {
    net: PolicyNet<Inference>,
    device: <Inference as Backend>::Device,
    rng: StdRng,
}

impl NetPolicy {
    fn new(actor_id: ActorId) -> Self {
        let device = Default::default();
        Self {
            net: PolicyNet::new(&device),
            device,
            rng: StdRng::seed_from_u64(1_000 + actor_id as u64),
        }
    }

    fn sample(&mut self, logits: &[f32]) -> usize {
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let weights: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f32 = weights.iter().sum();
        let mut draw = self.rng.gen::<f32>() * total;
        for (i, w) in weights.iter().enumerate() {
            if draw < *w {
                return i;
            }
            draw -= w;
        }
        weights.len() - 1
    }
}

impl Policy for NetPolicy {
    fn initial_state(&self) -> Vec<TensorBlob> {
        Vec::new()
    }

    fn act(&mut self, observation: &[TensorBlob], _agent_state: &[TensorBlob]) -> PolicyOutput {
        let input = to_float_tensor::<Inference, 1>(&observation[0], &self.device)
            .expect("observation tensor")
            .reshape([1, OBS_SIZE]);
        let (logits, value) = self.net.forward(input);
        let logits = logits.into_data().to_vec::<f32>().expect("f32 logits");
        let baseline = value.into_data().to_vec::<f32>().expect("f32 value")[0];
        let action = self.sample(&logits);

        PolicyOutput {
            action: vec![TensorBlob::from_slice(&[action as i64], vec![1]).expect("action shape")],
            policy_logits: vec![TensorBlob::from_slice(&logits, vec![N_ACTIONS]).expect("logits shape")],
            baseline,
            agent_state: Vec::new(),
        }
    }

    fn load_weights(&mut self, blob: &[u8]) -> Result<(), TensorError> {
        self.net = decode_into(self.net.clone(), blob, &self.device)?;
        Ok(())
    }
}

// ============================================================================
// Learners
// ============================================================================

fn train_err(e: impl std::fmt::Display) -> TrainError {
    TrainError(e.to_string())
}

/// Discounted returns over a time-major `[T, B]` grid. No bootstrap past the
/// end of the rollout.
fn discounted_returns(rewards: &[f32], dones: &[bool], t: usize, b: usize, gamma: f32) -> Vec<f32> {
    let mut returns = vec![0.0; t * b];
    for col in 0..b {
        let mut g = 0.0;
        for step in (0..t).rev() {
            let i = step * b + col;
            if dones[i] {
                g = 0.0;
            }
            g = rewards[i] + gamma * g;
            returns[i] = g;
        }
    }
    returns
}

struct PolicyLearner<O> {
    model: PolicyNet<Train>,
    optim: O,
    device: <Train as Backend>::Device,
    learning_rate: f64,
    gamma: f32,
    discriminator: WeightSubscriber,
    critic: DiscriminatorNet<Inference>,
    critic_device: <Inference as Backend>::Device,
    adversarial_weight: f32,
}

impl<O> PolicyLearner<O> {
    /// Load the newest discriminator weights, if any arrived.
    fn refresh_critic(&mut self) {
        if let Some(snapshot) = self.discriminator.poll() {
            match decode_into(self.critic.clone(), snapshot.blob(), &self.critic_device) {
                Ok(critic) => self.critic = critic,
                Err(e) => log::warn!("discriminator v{} not loaded: {}", snapshot.version(), e),
            }
        }
    }

    /// Add `adversarial_weight * log D(canvas)` to every episode-ending
    /// step. The canvas is the one the last stroke was painted on.
    fn add_adversarial_reward(&self, obs: &[f32], dones: &[bool], rewards: &mut [f32]) {
        let ends: Vec<usize> = (0..dones.len()).filter(|&i| dones[i]).collect();
        if ends.is_empty() || self.discriminator.seen_version() == 0 {
            return;
        }

        let pixels: Vec<f32> = ends
            .iter()
            .flat_map(|&i| {
                let start = i * OBS_SIZE;
                obs[start..start + SIDE * SIDE].iter().flat_map(|&p| [p, p, p])
            })
            .collect();
        let images = Tensor::<Inference, 2>::from_data(
            TensorData::new(pixels, [ends.len(), SIDE * SIDE * 3]),
            &self.critic_device,
        );
        match log_sigmoid(self.critic.forward(images)).into_data().to_vec::<f32>() {
            Ok(scores) => {
                for (&i, score) in ends.iter().zip(scores) {
                    rewards[i] += self.adversarial_weight * score;
                }
            }
            Err(e) => log::warn!("discriminator scores unreadable: {:?}", e),
        }
    }
}

impl<O> TrainStep<Batch> for PolicyLearner<O>
where
    O: Optimizer<PolicyNet<Train>, Train>,
{
    fn train(&mut self, batch: Batch) -> Result<TrainOutcome, TrainError> {
        let (t, b) = (batch.unroll_length(), batch.len());
        let n = t * b;
        self.refresh_critic();

        let obs = batch.observation(0).map_err(train_err)?;
        let obs_values = obs.to_vec::<f32>().map_err(train_err)?;
        let obs = to_float_tensor::<Train, 3>(&obs, &self.device)
            .map_err(train_err)?
            .reshape([n, OBS_SIZE]);
        let actions = batch.action(0).map_err(train_err)?;
        let actions = to_int_tensor::<Train, 3>(&actions, &self.device)
            .map_err(train_err)?
            .reshape([n, 1]);

        let mut rewards = batch.rewards().map_err(train_err)?.to_vec::<f32>().map_err(train_err)?;
        let dones = batch.dones().map_err(train_err)?.to_bools().map_err(train_err)?;
        self.add_adversarial_reward(&obs_values, &dones, &mut rewards);
        let returns = discounted_returns(&rewards, &dones, t, b, self.gamma);
        let returns = Tensor::<Train, 1>::from_data(TensorData::new(returns, [n]), &self.device);

        let (logits, values) = self.model.forward(obs);
        let log_probs = log_softmax(logits.clone(), 1);
        let taken = log_probs.clone().gather(1, actions).reshape([n]);
        let advantages = returns.clone() - values.clone().detach();

        let policy_loss = -(taken * advantages).mean();
        let value_loss = (returns - values).powf_scalar(2.0).mean();
        let entropy = -(softmax(logits, 1) * log_probs).sum_dim(1).mean();
        let loss = policy_loss + value_loss * 0.5 - entropy * 0.01;

        let loss_value = loss
            .clone()
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| train_err(format!("{:?}", e)))?[0];

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optim.step(self.learning_rate, self.model.clone(), grads);

        let blob = encode_module(&self.model.valid()).map_err(train_err)?;
        Ok(TrainOutcome::loss(loss_value).with_weights(blob))
    }
}

struct DiscriminatorLearner<O> {
    model: DiscriminatorNet<Train>,
    optim: O,
    device: <Train as Backend>::Device,
    learning_rate: f64,
    steps: usize,
    publish_every: usize,
}

impl<O> DiscriminatorLearner<O> {
    fn pixels(&self, blob: &TensorBlob, n: usize) -> Result<Tensor<Train, 2>, TrainError> {
        Ok(to_float_tensor::<Train, 4>(blob, &self.device)
            .map_err(train_err)?
            .reshape([n, SIDE * SIDE * 3])
            .div_scalar(255.0))
    }
}

impl<O> TrainStep<FrameImageBatch> for DiscriminatorLearner<O>
where
    O: Optimizer<DiscriminatorNet<Train>, Train>,
{
    fn train(&mut self, batch: FrameImageBatch) -> Result<TrainOutcome, TrainError> {
        let n = batch.len();
        let fake = self.pixels(batch.frames(), n)?;
        let real = self.pixels(batch.images(), n)?;

        let d_real = self.model.forward(real);
        let d_fake = self.model.forward(fake);
        let loss = -(log_sigmoid(d_real) + log_sigmoid(-d_fake)).mean();

        let loss_value = loss
            .clone()
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| train_err(format!("{:?}", e)))?[0];

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optim.step(self.learning_rate, self.model.clone(), grads);
        self.steps += 1;

        let outcome = TrainOutcome::loss(loss_value);
        if self.steps % self.publish_every == 0 {
            let blob = encode_module(&self.model.valid()).map_err(train_err)?;
            return Ok(outcome.with_weights(blob));
        }
        Ok(outcome)
    }
}

// ============================================================================
// Main
// ============================================================================

fn load_config() -> Result<BeastConfig, Box<dyn Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(BeastConfig::new()
            .with_num_actors(4)
            .with_batch_size(8)
            .with_frame_batch_size(8)
            .with_rollout_length(STROKES_PER_EPISODE)
            .with_max_rollouts_per_actor(200)
            .with_log_interval_ms(2_000)),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config()?;
    log::info!("config: {:?}", config);

    let device = Default::default();
    let policy_model = PolicyNet::<Train>::new(&device);
    let discriminator_model = DiscriminatorNet::<Train>::new(&device);
    let initial_policy = encode_module(&policy_model.valid())?;
    let initial_discriminator = encode_module(&discriminator_model.valid())?;

    let builder = Runtime::builder(config)
        .with_initial_weights(initial_policy)
        .with_discriminator_weights(initial_discriminator);

    let critic_device = Default::default();
    let policy_learner = PolicyLearner {
        model: policy_model,
        optim: AdamConfig::new().init::<Train, PolicyNet<Train>>(),
        device: device.clone(),
        learning_rate: 1e-3,
        gamma: 0.95,
        discriminator: builder.discriminator_channel().subscribe(),
        critic: DiscriminatorNet::new(&critic_device),
        critic_device,
        adversarial_weight: 0.5,
    };
    let discriminator_learner = DiscriminatorLearner {
        model: discriminator_model,
        optim: AdamConfig::new().init::<Train, DiscriminatorNet<Train>>(),
        device,
        learning_rate: 1e-3,
        steps: 0,
        publish_every: 10,
    };

    let runtime = builder
        .with_policy_sink(|version: u64, blob: &[u8]| {
            if version % 50 == 0 {
                log::info!("policy snapshot v{} ({} bytes)", version, blob.len());
            }
        })
        .start(
            |id| SyntheticCanvas::new(id as u64),
            NetPolicy::new,
            policy_learner,
            discriminator_learner,
        )?;

    while !runtime.wait_for_actors(Duration::from_secs(5)) {
        runtime.request_stats();
        std::thread::sleep(Duration::from_millis(50));
        let actors = paint_beast::actors::aggregate_stats(&runtime.actor_stats());
        log::info!(
            "actors: {} steps, {} episodes, avg return {:.3}, policy v{}",
            actors.steps,
            actors.episodes,
            actors.avg_episode_return,
            runtime.policy_weights().version()
        );
    }

    let report = runtime.shutdown();
    log::info!(
        "done in {:.1}s: {} rollouts, {} frame pairs, avg return {:.3}",
        report.elapsed.as_secs_f32(),
        report.actor_totals.rollouts_submitted,
        report.actor_totals.frame_pairs_submitted,
        report.actor_totals.avg_episode_return
    );
    for stats in [report.policy, report.discriminator].into_iter().flatten() {
        log::info!(
            "{} learner: {} steps, avg loss {:.4}, max staleness {}",
            stats.name,
            stats.train_steps,
            stats.avg_loss,
            stats.max_staleness
        );
    }
    Ok(())
}
