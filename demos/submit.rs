/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::env;

use mail_submit::{EmailClient, Library};

fn main() {
    env_logger::init();

    // Bracket all transport use with the process-wide guard.
    let _library = Library::init();

    let mut email = EmailClient::new().unwrap();
    email.server_url =
        env::var("SMTP_URL").unwrap_or_else(|_| "smtps://smtp.gmail.com:465".to_string());
    email.sender = env::var("SMTP_USER").expect("SMTP_USER not set");
    email.password = env::var("SMTP_PASSWORD").expect("SMTP_PASSWORD not set");
    email.cert_path = env::var("SMTP_CA_FILE")
        .unwrap_or_else(|_| "/etc/ssl/certs/ca-certificates.crt".to_string())
        .into();
    email.recipients = env::var("SMTP_RCPT")
        .expect("SMTP_RCPT not set")
        .split(',')
        .map(|rcpt| rcpt.trim().to_string())
        .collect();
    email.subject = "Hi!".to_string();
    email.body = "Hello, world!\r\n".to_string();

    // Connect, upgrade to TLS, authenticate and stream the message.
    let result = email.send(true);
    if result.is_ok() {
        println!("Message {} sent", email.last_message_id().unwrap());
    } else {
        eprintln!("Delivery failed: {result}");
        std::process::exit(1);
    }
}
