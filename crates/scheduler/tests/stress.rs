use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use chime_scheduler::{AlarmKey, AlarmMessage, MsgType, ScheduleRequest, Scheduler, SchedulerConfig, WaitTime};

struct XorShift(u64);

impl XorShift {
	fn next(&mut self) -> u64 {
		let mut x = self.0;
		x ^= x << 13;
		x ^= x >> 7;
		x ^= x << 17;
		self.0 = x;
		x
	}

	fn below(&mut self, n: u32) -> u32 {
		(self.next() % u64::from(n)) as u32 + 1
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_leave_a_consistent_registry() {
	let config = SchedulerConfig::new()
		.tick(Duration::from_millis(5))
		.rescan_every(NonZeroU64::new(2));
	let sched = Arc::new(Scheduler::start(config).unwrap());

	let run = async {
		let producers: Vec<_> = (0..4u64)
			.map(|seed| {
				let sched = Arc::clone(&sched);
				tokio::spawn(async move {
					let mut rng = XorShift(0x9E37_79B9_7F4A_7C15 ^ (seed + 1));
					for i in 0..200 {
						let key = AlarmKey::new(rng.below(16)).unwrap();
						let msg_type = MsgType::new(rng.below(4)).unwrap();
						let outcome = match rng.next() % 3 {
							0 => {
								let wait = WaitTime::new(rng.below(4)).unwrap();
								let msg = AlarmMessage::new(format!("p{seed} #{i}")).unwrap();
								sched.schedule(ScheduleRequest::new(key, msg_type, wait, msg)).await
							}
							1 => sched.start_worker(msg_type).await,
							_ => sched.cancel(key).await,
						};
						assert!(outcome.is_ok());
						if i % 10 == 0 {
							tokio::time::sleep(Duration::from_millis(1)).await;
						}
					}
				})
			})
			.collect();
		for producer in producers {
			producer.await.unwrap();
		}

		// Let in-flight replaces, cancels and rescans settle.
		tokio::time::sleep(Duration::from_millis(500)).await;

		let alarms = sched.alarms().await;
		assert!(alarms.windows(2).all(|w| w[0].key < w[1].key));
		let workers = sched.workers().await;
		assert!(workers.windows(2).all(|w| w[0].msg_type < w[1].msg_type));
		for alarm in alarms.iter().filter(|a| a.owner.is_some()) {
			let owner = workers.iter().find(|w| Some(w.worker) == alarm.owner).unwrap();
			assert_eq!(owner.msg_type, alarm.msg_type);
			assert!(!owner.retired);
		}
	};
	tokio::time::timeout(Duration::from_secs(30), run).await.unwrap();

	let sched = Arc::try_unwrap(sched).unwrap();
	tokio::time::timeout(Duration::from_secs(5), sched.shutdown())
		.await
		.unwrap()
		.unwrap();
}
