use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use webserve::parser::request::{apply_header_line, parse_request_line, Headers};
use webserve::parser::parse_line;

const REQ_SHORT: &[u8] = b"\
GET /api/v1.0/weather/forecast HTTP/1.1\r\n\
Host: weather.example.org\r\n\
Connection: keep-alive\r\n\
\r\n";

const REQ_LONG: &[u8] = b"\
GET /api/v1.0/weather/forecast?lat=51.5&lon=-0.1&units=metric HTTP/1.1\r\n\
Host: weather.example.org\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/109.0\r\n\
Accept: application/json\r\n\
Accept-Language: en-US,en;q=0.5\r\n\
Accept-Encoding: gzip, deflate, br\r\n\
Connection: keep-alive\r\n\
Content-Length: 0\r\n\
\r\n";

fn bench_parse_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_line");
    for (name, req) in [("short", REQ_SHORT), ("long", REQ_LONG)] {
        group.throughput(Throughput::Bytes(req.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), req, |b, req| {
            b.iter(|| {
                let mut buf = req.to_vec();
                let mut idx = 0;
                loop {
                    let (status, next) = parse_line(black_box(&mut buf), idx, buf.len());
                    if next == idx {
                        break;
                    }
                    idx = next;
                    if matches!(status, webserve::parser::LineStatus::Open) {
                        break;
                    }
                }
            })
        });
    }
    group.finish();
}

fn bench_parse_request_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_request_line");
    let line = b"GET /api/v1.0/weather/forecast?lat=51.5&lon=-0.1 HTTP/1.1";
    group.throughput(Throughput::Bytes(line.len() as u64));
    group.bench_function("request_line", |b| {
        b.iter(|| parse_request_line(black_box(line), 0, line.len()))
    });
    group.finish();
}

fn bench_apply_header_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_header_line");
    let line = b"User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/109.0";
    group.throughput(Throughput::Bytes(line.len() as u64));
    group.bench_function("header_line", |b| {
        b.iter(|| {
            let mut headers = Headers::default();
            apply_header_line(black_box(line), 0, line.len(), &mut headers)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_parse_line, bench_parse_request_line, bench_apply_header_line);
criterion_main!(benches);
