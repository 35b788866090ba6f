//! Interactive command-line client.
//!
//! Reads whitespace-tokenized lines, sends each as one request frame and
//! pretty-prints the tagged reply. `quit` exits and `hist` prints the last
//! few commands; both are handled locally. A lost connection is retried
//! with a short delay.

use std::collections::VecDeque;
use std::io::{self, BufRead, Read, Write};
use std::net::{Ipv4Addr, SocketAddr};
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::protocol::{Tag, K_MAX_MSG};
use crate::server::K_SERVER_PORT;

const K_HISTORY: usize = 10;
const K_RETRY_DELAY: Duration = Duration::from_secs(2);
const K_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

pub fn run() -> io::Result<()> {
    let stdin = io::stdin();
    let mut history: VecDeque<String> = VecDeque::new();
    let mut sock: Option<Socket> = None;

    loop {
        if sock.is_none() {
            match connect() {
                Ok(s) => {
                    println!("[connected to server]");
                    sock = Some(s);
                }
                Err(_) => {
                    eprintln!("[retrying connection in 2s...]");
                    thread::sleep(K_RETRY_DELAY);
                    continue;
                }
            }
        }

        print!("client> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // stdin closed
        }
        let args: Vec<&str> = line.split_whitespace().collect();
        if args.is_empty() {
            continue;
        }
        if args[0] == "quit" {
            break;
        }
        if args[0] == "hist" {
            println!("last {} commands:", history.len());
            for cmd in &history {
                println!("  {cmd}");
            }
            continue;
        }

        history.push_back(args.join(" "));
        if history.len() > K_HISTORY {
            history.pop_front();
        }

        let Some(s) = sock.as_mut() else { continue };
        if send_request(s, &args).and_then(|()| print_response(s)).is_err() {
            eprintln!("[lost connection, reconnecting...]");
            sock = None;
        }
    }

    println!("client exiting.");
    Ok(())
}

fn connect() -> io::Result<Socket> {
    let sock = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, K_SERVER_PORT));
    sock.connect(&SockAddr::from(addr))?;
    sock.set_read_timeout(Some(K_SOCKET_TIMEOUT))?;
    sock.set_write_timeout(Some(K_SOCKET_TIMEOUT))?;
    Ok(sock)
}

fn send_request(sock: &mut Socket, args: &[&str]) -> io::Result<()> {
    let mut body = Vec::new();
    body.extend_from_slice(&(args.len() as u32).to_le_bytes());
    for arg in args {
        body.extend_from_slice(&(arg.len() as u32).to_le_bytes());
        body.extend_from_slice(arg.as_bytes());
    }
    sock.write_all(&(body.len() as u32).to_le_bytes())?;
    sock.write_all(&body)
}

fn print_response(sock: &mut Socket) -> io::Result<()> {
    let mut header = [0u8; 4];
    sock.read_exact(&mut header)?;
    let len = u32::from_le_bytes(header) as usize;
    if len > K_MAX_MSG {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "reply too long"));
    }
    let mut body = vec![0u8; len];
    sock.read_exact(&mut body)?;
    print_body(&body);
    Ok(())
}

// Walk the reply and print each tagged value on its own line. Array
// elements follow flat, so the array itself only announces its size.
fn print_body(body: &[u8]) {
    let mut cur = body;
    while !cur.is_empty() {
        let tag = cur[0];
        cur = &cur[1..];
        if tag == Tag::Nil as u8 {
            println!("(nil)");
        } else if tag == Tag::Err as u8 {
            let Some(code) = take_u32(&mut cur) else { break };
            let Some(msg) = take_u32(&mut cur).and_then(|n| take_bytes(&mut cur, n as usize))
            else {
                break;
            };
            println!("(err) [{code}] {}", String::from_utf8_lossy(msg));
        } else if tag == Tag::Str as u8 {
            let Some(s) = take_u32(&mut cur).and_then(|n| take_bytes(&mut cur, n as usize)) else {
                break;
            };
            println!("\"{}\"", String::from_utf8_lossy(s));
        } else if tag == Tag::Int as u8 {
            let Some(bytes) = take_bytes(&mut cur, 8) else { break };
            println!("{}", i64::from_le_bytes(bytes.try_into().expect("eight bytes")));
        } else if tag == Tag::Dbl as u8 {
            let Some(bytes) = take_bytes(&mut cur, 8) else { break };
            println!("{}", f64::from_le_bytes(bytes.try_into().expect("eight bytes")));
        } else if tag == Tag::Arr as u8 {
            let Some(n) = take_u32(&mut cur) else { break };
            println!("[array of {} elements]", n / 2);
        } else {
            eprintln!("unknown reply tag: {tag}");
            break;
        }
    }
}

fn take_u32(cur: &mut &[u8]) -> Option<u32> {
    take_bytes(cur, 4).map(|b| u32::from_le_bytes(b.try_into().expect("four bytes")))
}

fn take_bytes<'a>(cur: &mut &'a [u8], n: usize) -> Option<&'a [u8]> {
    if cur.len() < n {
        return None;
    }
    let (head, rest) = cur.split_at(n);
    *cur = rest;
    Some(head)
}
