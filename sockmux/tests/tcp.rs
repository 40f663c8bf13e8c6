mod common;

use common::{local_addr, next_event, settle};
use sockmux::{Error, Reactor, ReactorBuilder, SocketEvent, SocketState};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[test]
fn test_connect_refused_reports_error() {
    let mut reactor = Reactor::new().expect("Failed to create reactor");
    let handle = reactor.handle();

    let id = handle
        .connect(7, "127.0.0.1", 1)
        .expect("Failed to submit connect");

    match next_event(&mut reactor) {
        SocketEvent::Error {
            id: failed,
            opaque,
            message,
        } => {
            assert_eq!(failed, id);
            assert_eq!(opaque, 7);
            assert!(!message.is_empty());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(reactor.info().is_empty());
}

#[test]
fn test_listen_accept_start_and_read() {
    let mut reactor = Reactor::new().expect("Failed to create reactor");
    let handle = reactor.handle();

    let listener = handle
        .listen(1, "127.0.0.1", 0, 16)
        .expect("Failed to listen");
    handle.start(listener, 1).expect("Failed to start listener");

    assert_eq!(
        next_event(&mut reactor),
        SocketEvent::Open {
            id: listener,
            opaque: 1,
            info: "start".to_owned(),
        }
    );

    let addr = local_addr(&reactor, listener);
    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).expect("Failed to connect to listener");
        stream.write_all(b"hello").expect("Failed to write to stream");

        let mut buffer = [0; 5];
        stream
            .read_exact(&mut buffer)
            .expect("Failed to read from stream");
        assert_eq!(&buffer, b"world");
    });

    let accepted = match next_event(&mut reactor) {
        SocketEvent::Accept {
            id,
            opaque,
            accepted,
            peer,
        } => {
            assert_eq!(id, listener);
            assert_eq!(opaque, 1);
            assert!(peer.starts_with("127.0.0.1:"), "peer was {peer}");
            accepted
        }
        other => panic!("unexpected event: {other:?}"),
    };

    let info = reactor.info();
    let pending = info
        .iter()
        .find(|info| info.id == accepted)
        .expect("Failed to find accepted socket");
    assert_eq!(pending.state, SocketState::PendingAccept);

    handle.start(accepted, 2).expect("Failed to start connection");
    assert_eq!(
        next_event(&mut reactor),
        SocketEvent::Open {
            id: accepted,
            opaque: 2,
            info: "start".to_owned(),
        }
    );

    let mut received = Vec::new();
    while received.len() < 5 {
        match next_event(&mut reactor) {
            SocketEvent::Data { id, opaque, data } => {
                assert_eq!((id, opaque), (accepted, 2));
                received.extend_from_slice(&data);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(received, b"hello");

    handle
        .send(accepted, b"world".to_vec())
        .expect("Failed to send");
    settle(&mut reactor);

    client.join().expect("Thread panicked");
}

#[test]
fn test_listen_reports_bind_errors_synchronously() {
    let taken = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let port = taken
        .local_addr()
        .expect("Failed to get local address")
        .port();

    let reactor = Reactor::new().expect("Failed to create reactor");
    let result = reactor.handle().listen(1, "127.0.0.1", port, 16);

    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_start_transfers_connected_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let mut reactor = Reactor::new().expect("Failed to create reactor");
    let handle = reactor.handle();
    let id = handle
        .connect(1, "127.0.0.1", addr.port())
        .expect("Failed to submit connect");

    assert_eq!(
        next_event(&mut reactor),
        SocketEvent::Open {
            id,
            opaque: 1,
            info: addr.to_string(),
        }
    );

    handle.start(id, 9).expect("Failed to start");
    assert_eq!(
        next_event(&mut reactor),
        SocketEvent::Open {
            id,
            opaque: 9,
            info: "transfer".to_owned(),
        }
    );

    // The peer hanging up is reported with the new owner.
    let (stream, _) = listener.accept().expect("Failed to accept connection");
    drop(stream);
    assert_eq!(next_event(&mut reactor), SocketEvent::Close { id, opaque: 9 });
}

#[test]
fn test_large_send_to_slow_reader() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let reader = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Failed to accept connection");
        thread::sleep(Duration::from_millis(200));

        let mut received = Vec::new();
        stream
            .read_to_end(&mut received)
            .expect("Failed to read from stream");
        received
    });

    let mut reactor = Reactor::new().expect("Failed to create reactor");
    let handle = reactor.handle();
    let id = handle
        .connect(3, "127.0.0.1", addr.port())
        .expect("Failed to submit connect");
    assert!(matches!(next_event(&mut reactor), SocketEvent::Open { .. }));

    let payload: Vec<u8> = (0..10 << 20).map(|i: u32| (i % 251) as u8).collect();
    handle.send(id, payload.clone()).expect("Failed to send");
    handle.close(id, 3).expect("Failed to close");

    assert_eq!(next_event(&mut reactor), SocketEvent::Close { id, opaque: 3 });

    let received = reader.join().expect("Thread panicked");
    assert_eq!(received.len(), payload.len());
    assert!(received == payload, "received bytes differ from sent bytes");
}

#[test]
fn test_close_with_queued_data_half_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");
    let (go, wait) = mpsc::channel::<()>();

    let reader = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Failed to accept connection");
        wait.recv().expect("Failed to wait for signal");

        let mut received = Vec::new();
        stream
            .read_to_end(&mut received)
            .expect("Failed to read from stream");
        received.len()
    });

    let mut reactor = Reactor::new().expect("Failed to create reactor");
    let handle = reactor.handle();
    let id = handle
        .connect(4, "127.0.0.1", addr.port())
        .expect("Failed to submit connect");
    assert!(matches!(next_event(&mut reactor), SocketEvent::Open { .. }));

    let total = 64 << 20;
    handle.send(id, vec![7; total]).expect("Failed to send");
    handle
        .send_low_priority(id, vec![8; 1024])
        .expect("Failed to send");
    handle.close(id, 4).expect("Failed to close");

    // Nothing is read yet, so the close must wait for the queue.
    let events = settle(&mut reactor);
    assert!(
        events
            .iter()
            .all(|e| matches!(e, SocketEvent::Warning { id: w, .. } if *w == id)),
        "unexpected events: {events:?}"
    );

    let info = reactor.info();
    let socket = info
        .iter()
        .find(|info| info.id == id)
        .expect("Failed to find socket");
    assert_eq!(socket.state, SocketState::HalfClose);
    assert!(socket.queued > 0);

    // Sends after close are dropped.
    handle.send(id, vec![9; 16]).expect("Failed to send");

    go.send(()).expect("Failed to signal reader");
    assert_eq!(next_event(&mut reactor), SocketEvent::Close { id, opaque: 4 });
    assert_eq!(reader.join().expect("Thread panicked"), total + 1024);
}

#[test]
fn test_queue_warnings_rise_and_clear() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");
    let (go, wait) = mpsc::channel::<()>();

    let reader = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Failed to accept connection");
        wait.recv().expect("Failed to wait for signal");

        let mut buffer = vec![0; 16 << 20];
        stream
            .read_exact(&mut buffer)
            .expect("Failed to read from stream");
    });

    let mut reactor = ReactorBuilder::new()
        .warning_threshold(4096)
        .build()
        .expect("Failed to create reactor");
    let handle = reactor.handle();
    let id = handle
        .connect(5, "127.0.0.1", addr.port())
        .expect("Failed to submit connect");
    assert!(matches!(next_event(&mut reactor), SocketEvent::Open { .. }));

    handle.send(id, vec![1; 16 << 20]).expect("Failed to send");
    match reactor.poll_timeout(Some(Duration::from_secs(5))) {
        Some(SocketEvent::Warning {
            id: warned,
            opaque,
            queued_kib,
        }) => {
            assert_eq!((warned, opaque), (id, 5));
            assert!(queued_kib > 4);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    go.send(()).expect("Failed to signal reader");
    loop {
        match reactor.poll_timeout(Some(Duration::from_secs(10))) {
            Some(SocketEvent::Warning { queued_kib: 0, .. }) => break,
            Some(SocketEvent::Warning { .. }) => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    reader.join().expect("Thread panicked");
}

#[test]
fn test_double_close_reports_once() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let mut reactor = Reactor::new().expect("Failed to create reactor");
    let handle = reactor.handle();
    let id = handle
        .connect(6, "127.0.0.1", addr.port())
        .expect("Failed to submit connect");
    assert!(matches!(next_event(&mut reactor), SocketEvent::Open { .. }));

    handle.close(id, 6).expect("Failed to close");
    handle.close(id, 6).expect("Failed to close");

    let closes = settle(&mut reactor)
        .into_iter()
        .filter(|e| matches!(e, SocketEvent::Close { id: closed, .. } if *closed == id))
        .count();
    assert_eq!(closes, 1);

    assert!(matches!(
        handle.send(id, b"late".to_vec()),
        Err(Error::InvalidSocket(invalid)) if invalid == id
    ));
}

#[test]
fn test_nodelay_and_echo_through_reactor() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Failed to accept connection");
        for _ in 0..3 {
            stream.write_all(b"ping").expect("Failed to write to stream");
            let mut buffer = [0; 4];
            stream
                .read_exact(&mut buffer)
                .expect("Failed to read from stream");
            assert_eq!(&buffer, b"ping");
        }
    });

    let mut reactor = Reactor::new().expect("Failed to create reactor");
    let handle = reactor.handle();
    let id = handle
        .connect(8, "127.0.0.1", addr.port())
        .expect("Failed to submit connect");
    handle.nodelay(id).expect("Failed to set nodelay");
    assert!(matches!(next_event(&mut reactor), SocketEvent::Open { .. }));

    let mut echoed = 0;
    while echoed < 12 {
        match next_event(&mut reactor) {
            SocketEvent::Data { data, .. } => {
                echoed += data.len();
                handle.send(id, data).expect("Failed to send");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // The last echo is still in the channel; the peer hangs up once it
    // has been written.
    assert_eq!(next_event(&mut reactor), SocketEvent::Close { id, opaque: 8 });
    peer.join().expect("Thread panicked");

    let info = reactor.info();
    assert!(info.iter().all(|info| info.id != id));
}

#[test]
fn test_half_closed_socket_discards_reads() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");
    let (write, wait_write) = mpsc::channel::<()>();
    let (go, wait) = mpsc::channel::<()>();

    let reader = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Failed to accept connection");
        wait_write.recv().expect("Failed to wait for signal");
        stream
            .write_all(b"written after closing")
            .expect("Failed to write to stream");

        wait.recv().expect("Failed to wait for signal");
        let mut received = Vec::new();
        stream
            .read_to_end(&mut received)
            .expect("Failed to read from stream");
        received.len()
    });

    let mut reactor = Reactor::new().expect("Failed to create reactor");
    let handle = reactor.handle();
    let id = handle
        .connect(10, "127.0.0.1", addr.port())
        .expect("Failed to submit connect");
    assert!(matches!(next_event(&mut reactor), SocketEvent::Open { .. }));

    let total = 64 << 20;
    handle.send(id, vec![3; total]).expect("Failed to send");
    handle.close(id, 10).expect("Failed to close");
    settle(&mut reactor);

    write.send(()).expect("Failed to signal reader");
    let events = settle(&mut reactor);
    assert!(
        !events.iter().any(|e| matches!(e, SocketEvent::Data { .. })),
        "unexpected events: {events:?}"
    );

    let info = reactor.info();
    let socket = info
        .iter()
        .find(|info| info.id == id)
        .expect("Failed to find socket");
    assert_eq!(socket.state, SocketState::HalfClose);
    assert_eq!(socket.read_bytes, 21);

    go.send(()).expect("Failed to signal reader");
    assert_eq!(next_event(&mut reactor), SocketEvent::Close { id, opaque: 10 });
    assert_eq!(reader.join().expect("Thread panicked"), total);
}

#[test]
fn test_shutdown_discards_queued_data() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");
    let (go, wait) = mpsc::channel::<()>();

    let reader = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Failed to accept connection");
        wait.recv().expect("Failed to wait for signal");

        let mut received = Vec::new();
        let _ = stream.read_to_end(&mut received);
        received.len()
    });

    let mut reactor = Reactor::new().expect("Failed to create reactor");
    let handle = reactor.handle();
    let id = handle
        .connect(11, "127.0.0.1", addr.port())
        .expect("Failed to submit connect");
    assert!(matches!(next_event(&mut reactor), SocketEvent::Open { .. }));

    let total = 64 << 20;
    handle.send(id, vec![5; total]).expect("Failed to send");
    handle.shutdown(id, 11).expect("Failed to shut down");

    assert_eq!(next_event(&mut reactor), SocketEvent::Close { id, opaque: 11 });
    assert!(reactor.info().is_empty());
    assert!(matches!(
        handle.send(id, b"late".to_vec()),
        Err(Error::InvalidSocket(_))
    ));

    go.send(()).expect("Failed to signal reader");
    assert!(reader.join().expect("Thread panicked") < total);
}
