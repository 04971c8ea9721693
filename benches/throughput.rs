//! Codec throughput: CRC, frame encoding and decoding.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use voltage_rtu::frame::{crc16, decode, encode};
use voltage_rtu::ModbusRequest;

fn bench_crc(c: &mut Criterion) {
    let data: Vec<u8> = (0..=253u8).collect();
    let mut group = c.benchmark_group("crc16");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("max_frame", |b| b.iter(|| crc16(black_box(&data))));
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let read = ModbusRequest::read_input_registers(1, 999, 1).unwrap();
    let coils = ModbusRequest::write_multiple_coils(1, 0, &[true; 1968]).unwrap();

    let mut group = c.benchmark_group("encode");
    group.bench_function("read_input_registers", |b| {
        b.iter(|| {
            encode(
                black_box(read.slave_id),
                read.function.to_u8(),
                &read.payload(),
            )
        })
    });
    group.bench_function("write_1968_coils", |b| {
        b.iter(|| {
            encode(
                black_box(coils.slave_id),
                coils.function.to_u8(),
                &coils.payload(),
            )
        })
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut registers = vec![250u8];
    registers.extend((0..250u16).map(|i| i as u8));
    let full = encode(1, 0x04, &registers);
    let exception = encode(1, 0x85, &[0x01]);

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(full.len() as u64));
    group.bench_function("125_registers", |b| b.iter(|| decode(black_box(&full))));
    group.bench_function("exception", |b| b.iter(|| decode(black_box(&exception))));
    group.finish();
}

criterion_group!(benches, bench_crc, bench_encode, bench_decode);
criterion_main!(benches);
