use criterion::{black_box, criterion_group, criterion_main, Criterion};
use goo_messaging::{Message, Priority, PriorityQueue};

fn queue_throughput(c: &mut Criterion) {
    let queue = PriorityQueue::new(1024).unwrap();
    c.bench_function("enqueue_dequeue_normal", |b| {
        b.iter(|| {
            queue
                .enqueue(Message::with_body(b"payload".to_vec()), false, None)
                .unwrap();
            black_box(queue.dequeue(false, None).unwrap());
        })
    });

    c.bench_function("enqueue_dequeue_mixed_bands", |b| {
        b.iter(|| {
            for priority in [Priority::Low, Priority::Critical, Priority::Normal] {
                let mut msg = Message::with_body(b"payload".to_vec());
                msg.set_priority(priority);
                queue.enqueue(msg, false, None).unwrap();
            }
            for _ in 0..3 {
                black_box(queue.dequeue(false, None).unwrap());
            }
        })
    });
}

criterion_group!(benches, queue_throughput);
criterion_main!(benches);
