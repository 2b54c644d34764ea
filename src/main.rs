use log::info;
use static_fileserver::{ConnectionAcceptor, Dispatcher, EventLoop, ServerConfig, ServerResult};
use std::env;
use std::path::Path;
use std::sync::Arc;

fn main() -> ServerResult<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config = if args.len() > 1 && Path::new(&args[1]).exists() {
        ServerConfig::from_json_file(&args[1])?
    } else {
        ServerConfig::new()
    };

    let dispatcher = Arc::new(Dispatcher::new(&config));

    let acceptor = Arc::new(ConnectionAcceptor::new(
        config.socket_address(),
        config.max_conns_per_ip,
        config.initial_buffer_size,
        config.connection_timeout,
    )?);

    info!(
        "serving files from {} on {} with {} workers",
        config.root_dir.display(),
        config.socket_address(),
        config.worker_threads
    );
    info!("stats at http://{}/stats", config.socket_address());

    let mut handles = Vec::with_capacity(config.worker_threads);
    for id in 0..config.worker_threads {
        let acceptor = acceptor.clone();
        let dispatcher = dispatcher.clone();
        let max_body = config.max_request_body_size;
        let handle = std::thread::spawn(move || -> ServerResult<()> {
            let mut event_loop = EventLoop::new(id as u32, acceptor, dispatcher, max_body)?;
            event_loop.run()
        });
        handles.push(handle);
    }

    ctrlc::set_handler(move || {
        info!("received shutdown signal, stopping");
        std::process::exit(0);
    })
    .expect("Error setting Ctrl-C handler");

    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}
