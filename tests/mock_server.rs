//! End-to-end tests against an in-process mock server that speaks the
//! server side of the native protocol, reusing the crate's own framing and
//! block codec for its half of the conversation.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use clickhouse_async::block::Block;
use clickhouse_async::column::CodecOptions;
use clickhouse_async::io::{
    BlockReader, BlockWriter, ClickHouseRead, ClickHouseWrite, StreamReader, StreamWriter,
};
use clickhouse_async::{
    CompressionMethod, Connection, ConnectionOptions, Error, ExecuteOptions, Pool, Value,
};

const SERVER_REVISION: u64 = 54453;

struct MockServer {
    addr: std::net::SocketAddr,
    inserted: Arc<Mutex<Vec<Vec<Value>>>>,
}

impl MockServer {
    fn options(&self) -> ConnectionOptions {
        ConnectionOptions::new(self.addr.ip().to_string(), self.addr.port())
    }
}

async fn spawn_mock(compression: Option<CompressionMethod>) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let inserted: Arc<Mutex<Vec<Vec<Value>>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = inserted.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let captured = captured.clone();
            tokio::spawn(async move {
                let _ = handle_session(stream, compression, captured).await;
            });
        }
    });
    MockServer { addr, inserted }
}

async fn handle_session(
    stream: TcpStream,
    compression: Option<CompressionMethod>,
    inserted: Arc<Mutex<Vec<Vec<Value>>>>,
) -> clickhouse_async::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = StreamReader::new(Box::new(read_half));
    let mut writer = StreamWriter::new(Box::new(write_half));
    let opts = CodecOptions::default();

    // Client hello.
    assert_eq!(reader.read_varint().await?, 0, "expected client Hello");
    let _client_name = reader.read_string().await?;
    let _version_major = reader.read_varint().await?;
    let _version_minor = reader.read_varint().await?;
    let client_revision = reader.read_varint().await?;
    let _database = reader.read_string().await?;
    let _user = reader.read_string().await?;
    let _password = reader.read_string().await?;
    let revision = client_revision.min(SERVER_REVISION);

    // Server hello.
    writer.write_varint(0).await?;
    writer.write_string("ClickHouse").await?;
    writer.write_varint(23).await?;
    writer.write_varint(8).await?;
    writer.write_varint(SERVER_REVISION).await?;
    writer.write_string("UTC").await?;
    writer.write_string("mock-server").await?;
    writer.write_varint(7).await?;
    writer.flush().await?;

    let block_reader = match compression {
        Some(method) => BlockReader::new(revision).with_compression(method),
        None => BlockReader::new(revision),
    };
    let block_writer = match compression {
        Some(method) => BlockWriter::new(revision).with_compression(method, 1 << 20),
        None => BlockWriter::new(revision),
    };

    loop {
        let Ok(tag) = reader.read_varint().await else {
            return Ok(()); // client went away
        };
        match tag {
            // Ping: answer with an interleaved Progress, then Pong.
            4 => {
                write_progress(&mut writer, 0, 0).await?;
                writer.write_varint(4).await?;
                writer.flush().await?;
            }
            // Query.
            1 => {
                let query = read_query(&mut reader, revision).await?;
                drain_external_tables(&mut reader, &block_reader, &opts).await?;
                respond(
                    &query,
                    &mut reader,
                    &mut writer,
                    &block_reader,
                    &block_writer,
                    &opts,
                    &inserted,
                )
                .await?;
            }
            other => panic!("mock server got unexpected client packet {other}"),
        }
    }
}

async fn read_query(reader: &mut StreamReader, revision: u64) -> clickhouse_async::Result<String> {
    let _query_id = reader.read_string().await?;

    // ClientInfo.
    let query_kind = reader.read_u8().await?;
    assert_eq!(query_kind, 1);
    let _initial_user = reader.read_string().await?;
    let _initial_query_id = reader.read_string().await?;
    let _initial_address = reader.read_string().await?;
    if revision >= 54449 {
        let _start_time = reader.read_u64().await?;
    }
    let _interface = reader.read_u8().await?;
    let _os_user = reader.read_string().await?;
    let _hostname = reader.read_string().await?;
    let _client_name = reader.read_string().await?;
    let _major = reader.read_varint().await?;
    let _minor = reader.read_varint().await?;
    let _client_revision = reader.read_varint().await?;
    if revision >= 54060 {
        let _quota_key = reader.read_string().await?;
    }
    if revision >= 54448 {
        let _distributed_depth = reader.read_varint().await?;
    }
    if revision >= 54401 {
        let _patch = reader.read_varint().await?;
    }
    if revision >= 54442 {
        let has_trace = reader.read_u8().await?;
        if has_trace == 1 {
            let _trace_id = reader.read_u128_pair().await?;
            let _span_id = reader.read_u64().await?;
            let _tracestate = reader.read_string().await?;
            let _flags = reader.read_u8().await?;
        }
    }
    if revision >= 54453 {
        let _collaborate = reader.read_varint().await?;
        let _replica_count = reader.read_varint().await?;
        let _replica_number = reader.read_varint().await?;
    }

    // Settings: (name, is_important, value) triples, empty name terminates.
    loop {
        let name = reader.read_string().await?;
        if name.is_empty() {
            break;
        }
        let _is_important = reader.read_u8().await?;
        let _value = reader.read_string().await?;
    }
    if revision >= 54441 {
        let _interserver_secret = reader.read_string().await?;
    }
    let _stage = reader.read_varint().await?;
    let _compression = reader.read_varint().await?;
    reader.read_string().await
}

async fn drain_external_tables(
    reader: &mut StreamReader,
    block_reader: &BlockReader,
    opts: &CodecOptions,
) -> clickhouse_async::Result<()> {
    loop {
        let tag = reader.read_varint().await?;
        assert_eq!(tag, 2, "expected Data packet while reading external tables");
        let _table_name = reader.read_string().await?;
        let block = block_reader.read_block(reader, opts).await?;
        if block.is_empty() {
            return Ok(());
        }
    }
}

async fn write_data_block(
    writer: &mut StreamWriter,
    block_writer: &BlockWriter,
    opts: &CodecOptions,
    block: &Block,
) -> clickhouse_async::Result<()> {
    writer.write_varint(1).await?;
    writer.write_string("").await?;
    block_writer.write_block(writer, block, opts).await
}

async fn write_progress(
    writer: &mut StreamWriter,
    rows: u64,
    bytes: u64,
) -> clickhouse_async::Result<()> {
    writer.write_varint(3).await?;
    writer.write_varint(rows).await?;
    writer.write_varint(bytes).await?;
    writer.write_varint(0).await?; // total_rows
    writer.write_varint(0).await?; // written_rows
    writer.write_varint(0).await?; // written_bytes
    Ok(())
}

async fn write_profile_info(writer: &mut StreamWriter, rows: u64) -> clickhouse_async::Result<()> {
    writer.write_varint(6).await?;
    writer.write_varint(rows).await?;
    writer.write_varint(1).await?; // blocks
    writer.write_varint(rows * 16).await?; // bytes
    writer.write_u8(0).await?; // applied_limit
    writer.write_varint(rows).await?; // rows_before_limit
    writer.write_u8(0).await?; // calculated_rows_before_limit
    Ok(())
}

async fn write_end_of_stream(writer: &mut StreamWriter) -> clickhouse_async::Result<()> {
    writer.write_varint(5).await?;
    writer.flush().await
}

fn typed_columns() -> Vec<(String, String)> {
    vec![
        ("a".into(), "Int8".into()),
        ("b".into(), "String".into()),
        ("c".into(), "Nullable(Int32)".into()),
    ]
}

fn typed_rows() -> Vec<Vec<Value>> {
    vec![
        vec![Value::Int8(-1), Value::String("x".into()), Value::Null],
        vec![Value::Int8(127), Value::String(String::new()), Value::Int32(42)],
    ]
}

fn insert_columns() -> Vec<(String, String)> {
    vec![("a".into(), "Int32".into()), ("b".into(), "String".into())]
}

async fn respond(
    query: &str,
    reader: &mut StreamReader,
    writer: &mut StreamWriter,
    block_reader: &BlockReader,
    block_writer: &BlockWriter,
    opts: &CodecOptions,
    inserted: &Arc<Mutex<Vec<Vec<Value>>>>,
) -> clickhouse_async::Result<()> {
    if query.contains("boom") {
        writer.write_varint(2).await?;
        writer.write_i32(60).await?;
        writer.write_string("DB::Exception").await?;
        writer.write_string("boom").await?;
        writer.write_string("0. fake stack frame").await?;
        writer.write_u8(1).await?;
        writer.write_i32(1000).await?;
        writer.write_string("DB::Exception").await?;
        writer.write_string("inner cause").await?;
        writer.write_string("").await?;
        writer.write_u8(0).await?;
        writer.flush().await?;
        return Ok(());
    }

    if query.trim_start().to_ascii_uppercase().starts_with("INSERT") {
        // Sample block: schema only, no rows.
        let sample = Block::from_columns(insert_columns(), vec![Vec::new(), Vec::new()]).unwrap();
        write_data_block(writer, block_writer, opts, &sample).await?;
        writer.flush().await?;

        // Read data blocks until the empty terminator.
        let mut written = 0u64;
        loop {
            let tag = reader.read_varint().await?;
            assert_eq!(tag, 2, "expected Data packet during INSERT");
            let _table_name = reader.read_string().await?;
            let block = block_reader.read_block(reader, opts).await?;
            if block.is_empty() {
                break;
            }
            written += block.n_rows() as u64;
            inserted.lock().await.extend(block.rows());
        }

        write_progress(writer, 0, written).await?;
        write_end_of_stream(writer).await?;
        return Ok(());
    }

    if query.contains("typed") {
        let header = Block::from_columns(
            typed_columns(),
            vec![Vec::new(), Vec::new(), Vec::new()],
        )
        .unwrap();
        write_data_block(writer, block_writer, opts, &header).await?;
        let data = Block::from_rows(typed_columns(), typed_rows()).unwrap();
        write_data_block(writer, block_writer, opts, &data).await?;
        write_progress(writer, 2, 64).await?;
        write_profile_info(writer, 2).await?;
        write_end_of_stream(writer).await?;
        return Ok(());
    }

    if query.contains("stream") {
        let columns = vec![("number".to_owned(), "UInt64".to_owned())];
        let header = Block::from_columns(columns.clone(), vec![Vec::new()]).unwrap();
        write_data_block(writer, block_writer, opts, &header).await?;
        for chunk in 0..3u64 {
            let rows: Vec<Vec<Value>> =
                (chunk * 2..chunk * 2 + 2).map(|n| vec![Value::UInt64(n)]).collect();
            let block = Block::from_rows(columns.clone(), rows).unwrap();
            write_data_block(writer, block_writer, opts, &block).await?;
        }
        write_end_of_stream(writer).await?;
        return Ok(());
    }

    // `SELECT <n>`: echo the number back as one UInt64 row.
    if let Some(n) = query
        .trim()
        .strip_prefix("SELECT ")
        .and_then(|rest| rest.trim().parse::<u64>().ok())
    {
        let columns = vec![(format!("{n}"), "UInt64".to_owned())];
        let block = Block::from_rows(columns, vec![vec![Value::UInt64(n)]]).unwrap();
        write_data_block(writer, block_writer, opts, &block).await?;
        write_end_of_stream(writer).await?;
        return Ok(());
    }

    // Anything else: an empty result.
    write_end_of_stream(writer).await
}

// ---- the tests ----------------------------------------------------------

#[tokio::test]
async fn handshake_then_ping() {
    let server = spawn_mock(None).await;
    let mut conn = Connection::new(server.options());
    conn.connect().await.unwrap();

    let info = conn.server_info().unwrap();
    assert_eq!(info.name, "ClickHouse");
    assert!(
        !info.display_name.is_empty()
            && info
                .display_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
        "display name {:?}",
        info.display_name
    );
    assert_eq!(info.version_patch, 7);
    assert_eq!(info.timezone.as_deref(), Some("UTC"));

    // Ping drains the interleaved Progress packet before the Pong.
    assert!(conn.ping().await.unwrap());
    assert!(conn.ping().await.unwrap());

    conn.disconnect().await.unwrap();
    assert!(!conn.ping().await.unwrap());
}

#[tokio::test]
async fn select_returns_typed_rows_in_order() {
    let server = spawn_mock(None).await;
    let mut conn = Connection::new(server.options());

    let result = conn.execute("SELECT typed FROM t").await.unwrap();
    assert_eq!(
        result.columns_with_types(),
        &[
            ("a".to_owned(), "Int8".to_owned()),
            ("b".to_owned(), "String".to_owned()),
            ("c".to_owned(), "Nullable(Int32)".to_owned()),
        ]
    );
    assert_eq!(result.rows(), typed_rows());

    // Progress and profile landed in the query info.
    let query_info = conn.last_query_info();
    assert_eq!(query_info.progress.rows, 2);
    assert_eq!(query_info.profile_info.unwrap().rows, 2);
}

#[tokio::test]
async fn select_roundtrips_compressed() {
    for method in [CompressionMethod::Lz4, CompressionMethod::Lz4Hc, CompressionMethod::Zstd] {
        let server = spawn_mock(Some(method)).await;
        let options = ConnectionOptions { compression: Some(method), ..server.options() };
        let mut conn = Connection::new(options);
        let result = conn.execute("SELECT typed FROM t").await.unwrap();
        assert_eq!(result.rows(), typed_rows(), "with {method:?}");
    }
}

#[tokio::test]
async fn insert_chunks_blocks_and_counts_rows() {
    let server = spawn_mock(Some(CompressionMethod::Lz4)).await;
    let options = ConnectionOptions {
        compression: Some(CompressionMethod::Lz4),
        insert_block_size: 1000,
        ..server.options()
    };
    let mut conn = Connection::new(options);

    let rows: Vec<Vec<Value>> = (0..10_000i32)
        .map(|i| vec![Value::Int32(i), Value::String(format!("row{i}"))])
        .collect();
    let inserted = conn.insert("INSERT INTO t (a, b) VALUES", rows.clone()).await.unwrap();
    assert_eq!(inserted, 10_000);

    // The mock decoded every compressed frame (verifying each checksum)
    // and saw exactly the rows we sent.
    let captured = server.inserted.lock().await;
    assert_eq!(captured.len(), 10_000);
    assert_eq!(captured[0], rows[0]);
    assert_eq!(captured[9_999], rows[9_999]);
}

#[tokio::test]
async fn insert_with_types_check_rejects_bad_rows_client_side() {
    let server = spawn_mock(None).await;
    let mut conn = Connection::new(server.options());

    let opts = ExecuteOptions { types_check: true, ..Default::default() };
    let err = conn
        .insert_with_options(
            "INSERT INTO t (a, b) VALUES",
            vec![vec![Value::String("not a number".into()), Value::String("x".into())]],
            &opts,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }), "got {err}");
}

#[tokio::test]
async fn streaming_rows_arrive_lazily() {
    let server = spawn_mock(None).await;
    let mut conn = Connection::new(server.options());

    let mut stream = conn.execute_iter("SELECT stream", &ExecuteOptions::default()).await.unwrap();
    let mut numbers = Vec::new();
    while let Some(row) = stream.next_row().await.unwrap() {
        assert_eq!(stream.columns_with_types(), &[("number".to_owned(), "UInt64".to_owned())]);
        numbers.push(row[0].clone());
    }
    assert_eq!(
        numbers,
        (0..6u64).map(Value::UInt64).collect::<Vec<_>>()
    );

    // Fully drained: the connection is reusable.
    let result = conn.execute("SELECT 9").await.unwrap();
    assert_eq!(result.rows(), vec![vec![Value::UInt64(9)]]);
}

#[tokio::test]
async fn partially_consumed_stream_blocks_the_next_query() {
    let server = spawn_mock(None).await;
    let mut conn = Connection::new(server.options());

    {
        let mut stream =
            conn.execute_iter("SELECT stream", &ExecuteOptions::default()).await.unwrap();
        let first = stream.next_row().await.unwrap().unwrap();
        assert_eq!(first, vec![Value::UInt64(0)]);
        // Dropped here with five rows unread.
    }

    let err = conn.execute("SELECT 1").await.unwrap_err();
    assert!(matches!(err, Error::PartiallyConsumedQuery), "got {err}");
}

#[tokio::test]
async fn server_exceptions_surface_with_their_chain() {
    let server = spawn_mock(None).await;
    let mut conn = Connection::new(server.options());

    let err = conn.execute("SELECT boom").await.unwrap_err();
    match err {
        Error::Server(exception) => {
            assert_eq!(exception.code, 60);
            assert_eq!(exception.message, "boom");
            // Stack traces stay hidden unless requested.
            assert!(exception.stack_trace.is_empty());
            assert_eq!(exception.nested.unwrap().code, 1000);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The exception ended the response; the connection still works.
    let result = conn.execute("SELECT 3").await.unwrap();
    assert_eq!(result.rows(), vec![vec![Value::UInt64(3)]]);
}

#[tokio::test]
async fn query_parameters_substitute_before_sending() {
    let server = spawn_mock(None).await;
    let mut conn = Connection::new(server.options());

    let mut params = std::collections::HashMap::new();
    params.insert("n".to_owned(), Value::UInt64(17));
    let opts = ExecuteOptions { params: Some(params), ..Default::default() };
    let result = conn.execute_with_options("SELECT {n}", &opts).await.unwrap();
    assert_eq!(result.rows(), vec![vec![Value::UInt64(17)]]);
}

#[tokio::test]
async fn pool_serves_concurrent_borrowers_and_settles_at_minsize() {
    let server = spawn_mock(None).await;
    let pool = Pool::new(server.options(), 2, 4).unwrap();
    pool.startup().await.unwrap();
    assert_eq!(pool.counts().await, (2, 0));

    let mut tasks = Vec::new();
    for i in 0..8u64 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let mut conn = pool.connection().await.unwrap();
            let result = conn.execute(&format!("SELECT {i}")).await.unwrap();
            assert_eq!(result.rows(), vec![vec![Value::UInt64(i)]]);
            conn.release().await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let (free, acquired) = pool.counts().await;
    assert_eq!(acquired, 0);
    assert!((2..=4).contains(&free), "free = {free}");

    pool.shutdown().await.unwrap();
    assert_eq!(pool.counts().await, (0, 0));
}

#[tokio::test]
async fn external_tables_ship_with_the_query() {
    let server = spawn_mock(None).await;
    let mut conn = Connection::new(server.options());

    let opts = ExecuteOptions {
        external_tables: vec![clickhouse_async::ExternalTable {
            name: "ids".into(),
            structure: vec![("id".into(), "UInt64".into())],
            rows: vec![vec![Value::UInt64(1)], vec![Value::UInt64(2)]],
        }],
        ..Default::default()
    };
    // The mock drains external tables before answering; a mismatch in the
    // framing would desynchronize the stream and fail the query.
    let result = conn.execute_with_options("SELECT 5", &opts).await.unwrap();
    assert_eq!(result.rows(), vec![vec![Value::UInt64(5)]]);
}
