//! 多工作线程第三方应用识别示例
//!
//! 演示如何为每个工作线程创建独立的发现上下文，按流哈希分配数据包，
//! 最后汇总各线程的统计。

use rayon::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tp_appid::classifier::tls_hello::build_client_hello;
use tp_appid::utils::logger::dev_config;
use tp_appid::utils::{init_logger, DebugConstraints};
use tp_appid::{AppId, Direction, DiscoveryBuilder, DiscoveryStats, FlowSession, Packet};

const WORKERS: usize = 4;

#[derive(Debug, Clone)]
struct Sample {
    name: &'static str,
    server_port: u16,
    client_port: u16,
    exchange: Vec<(Direction, Vec<u8>)>,
}

fn samples() -> Vec<Sample> {
    let mut samples = Vec::new();
    for i in 0..8u16 {
        samples.push(Sample {
            name: "HTTP GET",
            server_port: 80,
            client_port: 41000 + i,
            exchange: vec![
                (
                    Direction::FromInitiator,
                    format!("GET /item/{} HTTP/1.1\r\nHost: shop.example\r\nUser-Agent: demo\r\n\r\n", i)
                        .into_bytes(),
                ),
                (
                    Direction::FromResponder,
                    b"HTTP/1.1 200 OK\r\nServer: nginx\r\nContent-Type: text/html\r\n\r\n".to_vec(),
                ),
            ],
        });
        samples.push(Sample {
            name: "TLS",
            server_port: 443,
            client_port: 42000 + i,
            exchange: vec![(Direction::FromInitiator, build_client_hello(Some("mail.example"), &["h2"]))],
        });
        samples.push(Sample {
            name: "SSH",
            server_port: 22,
            client_port: 43000 + i,
            exchange: vec![(Direction::FromResponder, b"SSH-2.0-OpenSSH_9.0\r\n".to_vec())],
        });
        samples.push(Sample {
            name: "FTP",
            server_port: 21,
            client_port: 44000 + i,
            exchange: vec![
                (Direction::FromResponder, b"220 ready\r\n".to_vec()),
                (Direction::FromInitiator, b"USER demo\r\n".to_vec()),
            ],
        });
    }
    samples
}

fn worker_for(sample: &Sample) -> usize {
    let mut hasher = DefaultHasher::new();
    (sample.client_port, sample.server_port).hash(&mut hasher);
    (hasher.finish() as usize) % WORKERS
}

fn run_worker(worker: usize, assigned: Vec<Sample>) -> Result<DiscoveryStats, tp_appid::AppIdError> {
    let mut context = DiscoveryBuilder::new()
        .with_module_name("ref-impl")
        .enable_http2_detection()
        .strict()
        .build()?;
    context.debug_mut().enable_for(DebugConstraints {
        dst_port: Some(21),
        ..Default::default()
    });

    for sample in assigned {
        let mut flow = FlowSession::new();
        for (direction, data) in &sample.exchange {
            let packet = match direction {
                Direction::FromInitiator => Packet::tcp(data, sample.client_port, sample.server_port),
                Direction::FromResponder => Packet::tcp(data, sample.server_port, sample.client_port),
            };
            context.process_packet(&mut flow, &packet, *direction)?;
        }

        println!(
            "   [worker {}] {:<8} service={} client={} payload={}",
            worker, sample.name, flow.service_app_id, flow.client_app_id, flow.payload_app_id
        );
        if flow.service_app_id == AppId::HTTP {
            if let Some(url) = flow.http_session().and_then(|h| h.url()) {
                println!("   [worker {}]          url={}", worker, url);
            }
        }
        context.teardown(&mut flow);
    }

    context.print_stats();
    Ok(context.stats().clone())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger(dev_config())?;
    println!("🚀 tp_appid 多工作线程示例");

    let all = samples();
    let mut buckets: Vec<Vec<Sample>> = vec![Vec::new(); WORKERS];
    for sample in &all {
        buckets[worker_for(sample)].push(sample.clone());
    }
    println!("\n📊 {} 条流分配到 {} 个工作线程", all.len(), WORKERS);

    let results: Vec<DiscoveryStats> = buckets
        .into_par_iter()
        .enumerate()
        .map(|(worker, assigned)| run_worker(worker, assigned))
        .collect::<Result<_, _>>()?;

    let mut total = DiscoveryStats::new();
    for stats in &results {
        total.merge(stats);
    }

    println!("\n📈 汇总统计:");
    println!("{}", serde_json::to_string_pretty(&total)?);
    println!("   仍被持有的分类器会话: {}", total.live_handles());
    Ok(())
}
