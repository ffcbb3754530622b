use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const SLOTS: [&str; 6] = [
    "9:00 AM - 11:00 AM",
    "11:00 AM - 1:00 PM",
    "1:00 PM - 3:00 PM",
    "3:00 PM - 5:00 PM",
    "5:00 PM - 7:00 PM",
    "7:00 PM - 9:00 PM",
];

/// Map a running index to distinct (date, slot) pairs: six per day,
/// walking forward from a far-future base date.
fn session_date(i: usize) -> String {
    let base = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
    (base + Days::new((i / SLOTS.len()) as u64)).to_string()
}

fn session_slot(i: usize) -> &'static str {
    SLOTS[i % SLOTS.len()]
}

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("sessiond")
        .password("sessiond");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

async fn register_coach(client: &tokio_postgres::Client, id: Ulid) {
    client
        .batch_execute(&format!(
            "INSERT INTO coaches (id, category) VALUES ('{id}', 'general')"
        ))
        .await
        .unwrap();
}

async fn insert_booking(client: &tokio_postgres::Client, coach: Ulid, i: usize) {
    let bid = Ulid::new();
    let cid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, coach_id, client_id, date, slot, payment_method) \
             VALUES ('{bid}', '{coach}', '{cid}', '{}', '{}', 'cash')",
            session_date(i),
            session_slot(i),
        ))
        .await
        .unwrap();
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn setup(client: &tokio_postgres::Client) -> Vec<Ulid> {
    let mut coaches = Vec::new();
    for _ in 0..10 {
        let id = Ulid::new();
        register_coach(client, id).await;
        coaches.push(id);
    }
    println!("  created {} coaches", coaches.len());
    coaches
}

async fn phase1_sequential(host: &str, port: u16, coach: Ulid) {
    let client = connect(host, port).await;

    // Re-create the coach in this phase's own tenant
    register_coach(&client, coach).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        insert_booking(&client, coach, i).await;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16, coaches: &[Ulid]) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_tasks {
        let host = host.to_string();
        let coach = coaches[i % coaches.len()];

        handles.push(tokio::spawn(async move {
            // Each task uses its own tenant (unique dbname from connect())
            let client = connect(&host, port).await;
            register_coach(&client, coach).await;

            for j in 0..n_per_task {
                insert_booking(&client, coach, j).await;
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(host: &str, port: u16) {
    // Writer tasks: continuously add bookings in the background
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            // Writers use their own tenant to avoid slot conflicts
            let client = connect(&host, port).await;
            let coach = Ulid::new();
            register_coach(&client, coach).await;

            let mut i = 0usize;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let bid = Ulid::new();
                let cid = Ulid::new();
                let _ = client
                    .batch_execute(&format!(
                        "INSERT INTO bookings (id, coach_id, client_id, date, slot, payment_method) \
                         VALUES ('{bid}', '{coach}', '{cid}', '{}', '{}', 'cash')",
                        session_date(i),
                        session_slot(i),
                    ))
                    .await;
                i += 1;
            }
        }));
    }

    // Reader tasks: query the slot board and measure latency
    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let coach = Ulid::new();
            register_coach(&client, coach).await;

            // Some bookings so the board is non-trivial
            for i in 0..50 {
                insert_booking(&client, coach, i).await;
            }

            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "SELECT * FROM slots WHERE coach_id = '{coach}' AND date = '{}'",
                        session_date(i % 50),
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("slot board query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let coach = Ulid::new();
            register_coach(&client, coach).await;

            for i in 0..ops_per_conn {
                insert_booking(&client, coach, i).await;
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SESSIOND_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SESSIOND_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid SESSIOND_PORT");

    println!("=== sessiond stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own tenant (unique dbname) to avoid interference

    println!("[setup]");
    let setup_client = connect(&host, port).await;
    let coaches = setup(&setup_client).await;
    drop(setup_client);

    println!("\n[phase 1] sequential write throughput");
    phase1_sequential(&host, port, coaches[0]).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(&host, port, &coaches).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
