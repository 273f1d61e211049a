use std::{
    num::{NonZeroU64, NonZeroUsize},
    sync::Arc,
    time::Duration,
};

use comms::specs::machine_learning::{CostSpec, LayerSpec, NetworkSpec, NeuronSpec, SquashingSpec};
use machine_learning::arch::LayeredNetwork;
use ndarray::array;
use parameter_server::{ConvergencePolicy, MergeServer, MergeService};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use worker::{
    Dataset, GradientAccumulator, MergeClient, Partition, Result, data::shard_range,
};

const INSTANCES: [(f32, f32); 4] = [(1.0, 2.0), (2.0, 3.0), (-1.0, 0.5), (0.5, 1.0)];
const INITIAL: f32 = 0.1;
const LEARNING_RATE: f32 = 0.05;
const MOMENTUM: f32 = 0.3;
const SLAVES: usize = 2;

type Client = MergeClient<OwnedReadHalf, OwnedWriteHalf>;

fn spec() -> NetworkSpec {
    let layer = LayerSpec {
        size: 1,
        neuron: NeuronSpec::Standard,
        squashing: SquashingSpec::Identity,
    };

    NetworkSpec {
        layers: vec![layer, layer],
        cost: CostSpec::SquaredError,
        learning_rate: LEARNING_RATE,
        momentum: MOMENTUM,
        regularization: 0.,
        bias: false,
    }
}

fn dataset() -> Arc<Dataset> {
    let data = INSTANCES.iter().flat_map(|&(x, y)| [x, y]).collect();
    Arc::new(Dataset::new(data, 2).unwrap())
}

fn service(merge_limit: u64) -> Arc<MergeService> {
    Arc::new(MergeService::new(
        vec![array![[INITIAL]]],
        NonZeroUsize::new(SLAVES).unwrap(),
        ConvergencePolicy {
            check_interval: NonZeroU64::new(1_000_000).unwrap(),
            merge_limit,
            error_threshold: 0.,
        },
    ))
}

async fn slaves(addr: &str) -> Result<Vec<(GradientAccumulator<Partition>, Client)>> {
    let dataset = dataset();
    let mut slaves = Vec::new();

    for id in 0..SLAVES {
        let range = shard_range(dataset.len(), id, SLAVES);
        let partition = Partition::new(Arc::clone(&dataset), range);
        let network = LayeredNetwork::new(spec(), vec![array![[INITIAL]]], Some(id as u64))?;
        let acc = GradientAccumulator::new(network, partition, NonZeroUsize::MIN);
        let client = MergeClient::connect(addr, 5, Duration::from_millis(10)).await?;
        slaves.push((acc, client));
    }

    Ok(slaves)
}

/// Plain sgd with momentum where every slave trains on its own stale copy of the weight.
fn reference(rounds: usize) -> f32 {
    let mut canonical = INITIAL;
    let mut local = [(INITIAL, 0.0_f32); SLAVES];

    for round in 0..rounds {
        for (id, (w, p)) in local.iter_mut().enumerate() {
            let partition = shard_range(INSTANCES.len(), id, SLAVES);
            let (x, y) = INSTANCES[partition.start + round % partition.len()];

            let delta = *w * x - y;
            let update = -LEARNING_RATE * delta * x + MOMENTUM * *p;
            let applied = update / SLAVES as f32;

            canonical += applied;
            *w = canonical;
            *p = applied;
        }
    }

    canonical
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn serialized_rounds_match_closed_form_sgd_with_momentum() -> Result<()> {
    const ROUNDS: usize = 7;

    let service = service(u64::MAX);
    let handle = MergeServer::start(Arc::clone(&service), "127.0.0.1:0", NonZeroUsize::MIN).await?;
    let addr = handle.local_addr().to_string();
    let mut slaves = slaves(&addr).await?;

    for _ in 0..ROUNDS {
        for (acc, client) in slaves.iter_mut() {
            assert!(!acc.round(client).await?);
        }
    }

    for (_, client) in slaves {
        client.disconnect().await?;
    }
    handle.stop().await;

    let expected = reference(ROUNDS);
    let got = service.weights()[0][[0, 0]];
    assert!(
        (got - expected).abs() < 1e-6,
        "canonical weight {got}, expected {expected}"
    );
    assert_eq!(service.merge_count(), (ROUNDS * SLAVES) as u64);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_slaves_stop_at_the_merge_limit() -> Result<()> {
    const LIMIT: u64 = 20;

    let service = service(LIMIT);
    let handle = MergeServer::start(
        Arc::clone(&service),
        "127.0.0.1:0",
        NonZeroUsize::new(SLAVES).unwrap(),
    )
    .await?;
    let addr = handle.local_addr().to_string();

    let tasks: Vec<_> = slaves(&addr)
        .await?
        .into_iter()
        .map(|(mut acc, mut client)| {
            tokio::spawn(async move {
                let rounds = acc.run(&mut client).await?;
                client.disconnect().await?;
                Result::Ok((rounds, acc.is_converged()))
            })
        })
        .collect();

    let mut total = 0;
    for task in tasks {
        let (rounds, converged) = task.await.expect("slave task panicked")?;
        assert!(converged);
        total += rounds;
    }

    service.converged().await;
    handle.stop().await;

    assert!(service.is_converged());
    assert_eq!(service.merge_count(), LIMIT);
    assert!(total >= LIMIT);
    assert!(service.weights()[0][[0, 0]].is_finite());
    Ok(())
}
