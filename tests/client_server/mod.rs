mod extensions_test;
mod kv_test;
mod pubsub_test;
mod reconnect_test;
