use crate::core::{local_actor_msg_convert, ActorSignal, LocalActorMsg};
use std::sync::Arc;

pub struct LocalRef<T> {
  pub(crate) func: Arc<dyn Fn(LocalActorMsg<T>) -> bool + Send + Sync>,
}
impl<T> Clone for LocalRef<T> {
  fn clone(&self) -> Self {
    LocalRef {
      func: self.func.clone(),
    }
  }
}
impl<T: Send + 'static> LocalRef<T> {
  pub fn send(&self, item: T) -> bool {
    (&self.func)(LocalActorMsg::Msg(item))
  }

  pub fn signal(&self, sig: ActorSignal) -> bool {
    (&self.func)(LocalActorMsg::Signal(sig))
  }

  pub fn transform<I: Send + 'static>(&self) -> LocalRef<I>
  where
    T: From<I>,
  {
    let func = self.func.clone();
    LocalRef {
      func: Arc::new(move |x: LocalActorMsg<I>| {
        func(local_actor_msg_convert(x))
      }),
    }
  }

  pub fn void() -> LocalRef<T> {
    LocalRef {
      func: Arc::new(|_: LocalActorMsg<T>| false),
    }
  }
}

#[cfg(test)]
use std::sync::Mutex;

#[test]
fn test_local_ref_transform() {
  let seen = Arc::new(Mutex::new(Vec::<u64>::new()));
  let sink = seen.clone();
  let r = LocalRef::<u64> {
    func: Arc::new(move |x: LocalActorMsg<u64>| match x {
      LocalActorMsg::Msg(m) => {
        sink.lock().unwrap().push(m);
        true
      }
      LocalActorMsg::Signal(_) => false,
    }),
  };
  assert!(r.send(3));
  assert!(r.transform::<u32>().send(4));
  assert!(!r.signal(ActorSignal::Term));
  assert!(!LocalRef::<u64>::void().send(5));
  assert_eq!(*seen.lock().unwrap(), vec![3, 4]);
}
