use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const H: i64 = 60; // 1 hour in minutes
const DAY: i64 = 24 * H;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("tarmac")
        .password("tarmac");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
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

async fn setup_instructor(client: &tokio_postgres::Client, buffer: i64) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO instructors (id, name, buffer_min, step_min, lead_min) VALUES ('{id}', 'bench', {buffer}, 30, 0)"
        ))
        .await
        .unwrap();
    // Open every weekday 08:00-18:00
    for weekday in 0..7 {
        let rule_id = Ulid::new();
        client
            .batch_execute(&format!(
                r#"INSERT INTO schedule_rules (id, instructor_id, weekday, start, "end") VALUES ('{rule_id}', '{id}', {weekday}, {}, {})"#,
                8 * H,
                18 * H,
            ))
            .await
            .unwrap();
    }
    id
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let instructor = setup_instructor(&client, 0).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let rid = Ulid::new();
        let s = (i as i64) * 2 * H;
        let t = Instant::now();
        client
            .batch_execute(&format!(
                "INSERT INTO reservations (id, instructor_id, student_id, start, duration) VALUES ('{rid}', '{instructor}', '{}', {s}, 60)",
                Ulid::new(),
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("commit latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();

        handles.push(tokio::spawn(async move {
            // Each task uses its own school (unique dbname from connect())
            let client = connect(&host, port).await;
            let instructor = setup_instructor(&client, 0).await;

            for j in 0..n_per_task {
                let rid = Ulid::new();
                let s = (j as i64) * 2 * H;
                client
                    .batch_execute(&format!(
                        "INSERT INTO reservations (id, instructor_id, student_id, start, duration) VALUES ('{rid}', '{instructor}', '{}', {s}, 60)",
                        Ulid::new(),
                    ))
                    .await
                    .unwrap();
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

async fn phase3_conflict_storm(host: &str, port: u16) {
    // Many clients fight over the same instructor's Monday. Exactly one
    // booking per slot may win; everyone else must see SLOT_ALREADY_BOOKED.
    let setup_client = connect_named(host, port, "conflict_storm").await;
    let instructor = setup_instructor(&setup_client, 0).await;

    let n_tasks = 10;
    let slots_per_day = 10; // 08:00-18:00 hourly
    let monday = 4i64; // 1970-01-05

    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            // Same school for every task: dbname must match the setup client's.
            let client = connect_named(&host, port, "conflict_storm").await;
            let mut wins = 0usize;
            let mut conflicts = 0usize;
            for i in 0..slots_per_day {
                let rid = Ulid::new();
                let s = monday * DAY + 8 * H + (i as i64) * H;
                let result = client
                    .batch_execute(&format!(
                        "INSERT INTO reservations (id, instructor_id, student_id, start, duration) VALUES ('{rid}', '{instructor}', '{}', {s}, 60)",
                        Ulid::new(),
                    ))
                    .await;
                match result {
                    Ok(_) => wins += 1,
                    Err(_) => conflicts += 1,
                }
            }
            (wins, conflicts)
        }));
    }

    let mut total_wins = 0;
    let mut total_conflicts = 0;
    for h in handles {
        let (w, c) = h.await.unwrap();
        total_wins += w;
        total_conflicts += c;
    }

    println!(
        "  {n_tasks} clients x {slots_per_day} slots: {total_wins} wins, {total_conflicts} conflicts"
    );
    assert_eq!(
        total_wins, slots_per_day,
        "each slot must be won exactly once"
    );
    drop(setup_client);
}

async fn connect_named(host: &str, port: u16, school: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(school)
        .user("tarmac")
        .password("tarmac");
    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        let _ = conn.await;
    });
    client
}

async fn phase4_read_under_load(host: &str, port: u16) {
    // Writer tasks: continuously book in their own schools
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let instructor = setup_instructor(&client, 0).await;
            let mut i = 0i64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let rid = Ulid::new();
                let s = i * 2 * H;
                let _ = client
                    .batch_execute(&format!(
                        "INSERT INTO reservations (id, instructor_id, student_id, start, duration) VALUES ('{rid}', '{instructor}', '{}', {s}, 60)",
                        Ulid::new(),
                    ))
                    .await;
                i += 1;
            }
        }));
    }

    // Reader tasks: slot queries against their own pre-filled instructors
    let n_readers = 10;
    let reads_per_reader = 500;
    let monday = 4i64;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let instructor = setup_instructor(&client, 10).await;
            // Pre-fill Monday with a few lessons so the subtraction is non-trivial
            for i in 0..5 {
                let rid = Ulid::new();
                let s = monday * DAY + 8 * H + (i as i64) * 2 * H;
                client
                    .batch_execute(&format!(
                        "INSERT INTO reservations (id, instructor_id, student_id, start, duration) VALUES ('{rid}', '{instructor}', '{}', {s}, 60)",
                        Ulid::new(),
                    ))
                    .await
                    .unwrap();
            }

            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "SELECT * FROM slots WHERE instructor_id = '{instructor}' AND day = {monday} AND duration = 45 AND now = 0"
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

    print_latency("slot query", &mut all_latencies);
}

async fn phase5_connection_storm(host: &str, port: u16) {
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
            let instructor = setup_instructor(&client, 0).await;

            for i in 0..ops_per_conn {
                let rid = Ulid::new();
                let s = (i as i64) * 2 * H;
                client
                    .batch_execute(&format!(
                        "INSERT INTO reservations (id, instructor_id, student_id, start, duration) VALUES ('{rid}', '{instructor}', '{}', {s}, 60)",
                        Ulid::new(),
                    ))
                    .await
                    .unwrap();
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
    let host = std::env::var("TARMAC_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("TARMAC_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid TARMAC_PORT");

    println!("=== tarmac stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own school (unique dbname) to avoid interference

    println!("[phase 1] sequential commit throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent commit throughput");
    phase2_concurrent(&host, port).await;

    println!("\n[phase 3] conflict storm on one instructor");
    phase3_conflict_storm(&host, port).await;

    println!("\n[phase 4] slot-query latency under write load");
    phase4_read_under_load(&host, port).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
