use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::Config;
use crate::queue::JobQueue;
use crate::routes::{ServiceStatus, execute_handler, json_error_handler, status_handler};

pub fn build_server(config: Arc<Config>, queue: Arc<JobQueue>) -> std::io::Result<Server> {
    let bind_address = config
        .server
        .bind_address
        .clone()
        .unwrap_or("127.0.0.1".to_string());
    let bind_port = config.server.bind_port.unwrap_or(12345);

    let config = web::Data::from(config);
    let queue = web::Data::from(queue);
    let status = web::Data::new(ServiceStatus::now());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(config.clone())
            .app_data(queue.clone())
            .app_data(status.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .service(execute_handler)
            .service(status_handler)
    })
    .bind((bind_address, bind_port))?
    .run();

    Ok(server)
}
